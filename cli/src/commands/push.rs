//! `ukpack push` command - Push an image archive to a registry.

use std::path::{Path, PathBuf};

use clap::Args;
use ukpack_core::{PackError, Settings};
use ukpack_runtime::{
    ImageArchive, PushOptions, RegistryAuth, RegistryEndpoint, RegistryPusher, UploadMode,
};

use crate::output::format_bytes;

#[derive(Args, Debug, Default)]
pub struct PushArgs {
    /// Image archive [default: the only file in the output directory]
    #[arg(short = 'i', long)]
    pub image: Option<PathBuf>,

    /// Repository name [default: archive file name]
    #[arg(short = 'n', long)]
    pub name: Option<String>,

    /// Registry URL (e.g., "https://registry.example.com")
    #[arg(short = 's', long)]
    pub server: Option<String>,

    /// Project the repository belongs to
    #[arg(short = 'p', long)]
    pub project: Option<String>,

    /// Registry username
    #[arg(short = 'u', long)]
    pub user: Option<String>,

    /// Registry password
    #[arg(long)]
    pub password: Option<String>,

    /// Manifest tag
    #[arg(long)]
    pub tag: Option<String>,

    /// Bytes per upload chunk
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Upload each blob in a single request
    #[arg(long)]
    pub monolithic: bool,

    /// Skip the GET that checks each uploaded blob
    #[arg(long)]
    pub no_verify: bool,

    /// Only print the manifest URL
    #[arg(short, long)]
    pub quiet: bool,
}

/// Everything needed to push, resolved from arguments and settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PushPlan {
    pub image: PathBuf,
    pub name: Option<String>,
    pub server: String,
    pub project: String,
    pub auth: RegistryAuth,
    pub options: PushOptions,
}

pub fn plan(args: &PushArgs, settings: &Settings) -> Result<PushPlan, PackError> {
    let registry = &settings.registry;

    let server = args
        .server
        .clone()
        .or_else(|| registry.server.clone())
        .ok_or_else(|| {
            PackError::Config(
                "no registry server configured; pass --server or set UKPACK_REGISTRY_URL"
                    .to_string(),
            )
        })?;

    let image = match &args.image {
        Some(path) => path.clone(),
        None => default_image(&settings.package.output_dir)?,
    };

    let upload_mode = if args.monolithic {
        UploadMode::Monolithic
    } else {
        UploadMode::Chunked {
            chunk_size: args.chunk_size.unwrap_or(registry.chunk_size),
        }
    };

    let auth = RegistryAuth::from_parts(
        args.user.clone().or_else(|| registry.username.clone()),
        args.password.clone().or_else(|| registry.password.clone()),
    );

    Ok(PushPlan {
        image,
        name: args.name.clone(),
        server,
        project: args.project.clone().unwrap_or_else(|| registry.project.clone()),
        auth,
        options: PushOptions {
            tag: args.tag.clone().unwrap_or_else(|| registry.tag.clone()),
            upload_mode,
            verify: registry.verify && !args.no_verify,
        },
    })
}

/// The single file in `dir`.
pub fn default_image(dir: &Path) -> Result<PathBuf, PackError> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        PackError::Validation(format!(
            "cannot list output directory {}: {}; pass --image",
            dir.display(),
            e
        ))
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }

    match files.len() {
        1 => Ok(files.remove(0)),
        0 => Err(PackError::Validation(format!(
            "no image archive in {}; pass --image",
            dir.display()
        ))),
        n => Err(PackError::Validation(format!(
            "{} files in {}; pass --image to choose one",
            n,
            dir.display()
        ))),
    }
}

pub async fn execute(
    args: PushArgs,
    settings: &Settings,
) -> Result<(), Box<dyn std::error::Error>> {
    let plan = plan(&args, settings)?;
    tracing::debug!(
        image = %plan.image.display(),
        server = %plan.server,
        project = %plan.project,
        anonymous = plan.auth.is_anonymous(),
        "Resolved push plan"
    );

    let image = plan.image.clone();
    let archive = tokio::task::spawn_blocking(move || ImageArchive::open(image)).await??;

    let name = plan
        .name
        .clone()
        .unwrap_or_else(|| archive.default_repository_name());
    let endpoint = RegistryEndpoint::new(&plan.server, &plan.project, name)?;

    if !args.quiet {
        println!(
            "Pushing {} to {}{}:{}",
            plan.image.display(),
            endpoint.server(),
            endpoint.name(),
            plan.options.tag
        );
    }

    let pusher = RegistryPusher::new(endpoint, plan.auth, plan.options)?;
    let result = pusher.push(&archive).await?;

    if args.quiet {
        println!("{}", result.manifest_url);
    } else {
        println!(
            "Pushed {} blobs ({}) in {} requests: {}",
            result.blobs_pushed,
            format_bytes(result.bytes_uploaded),
            result.requests,
            result.manifest_url
        );
    }

    Ok(())
}
