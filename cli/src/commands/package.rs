//! `ukpack package` command - Build an OCI image archive from a kernel.

use std::path::PathBuf;

use clap::Args;
use ukpack_core::{PackError, Settings};
use ukpack_runtime::{
    Algorithm, ArtifactWrapper, Compression, FilesystemWrapper, ImageWrapper, PackageOptions,
    PackageResult, Packager,
};

use crate::output::{format_bytes, new_table};

#[derive(Args, Debug)]
pub struct PackageArgs {
    /// Path to the kernel image
    pub kernel: PathBuf,

    /// Target architecture (e.g., "x86_64", "arm64")
    pub architecture: String,

    /// Target platform (e.g., "kvm", "xen")
    pub platform: String,

    /// Path to the kernel .config file
    pub config: PathBuf,

    /// Filesystem image (e.g., an initrd) to ship with the kernel
    #[arg(long)]
    pub filesystem: Option<PathBuf>,

    /// Extra file or directory to include (repeatable)
    #[arg(long = "artifact")]
    pub artifacts: Vec<PathBuf>,

    /// Digest algorithm: sha256, sha384 or sha512
    #[arg(long)]
    pub hash_type: Option<String>,

    /// Compression: tar or gzip
    #[arg(long)]
    pub compression: Option<String>,

    /// Output archive path [default: <output_dir>/<kernel file name>]
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Reference name recorded in index.json
    #[arg(long)]
    pub ref_name: Option<String>,

    /// Only print the manifest digest
    #[arg(short, long)]
    pub quiet: bool,
}

/// Build the packager and output path from arguments and settings.
pub fn plan(args: &PackageArgs, settings: &Settings) -> Result<(Packager, PathBuf), PackError> {
    let algorithm: Algorithm = args
        .hash_type
        .as_deref()
        .unwrap_or(&settings.package.algorithm)
        .parse()?;
    let compression: Compression = args
        .compression
        .as_deref()
        .unwrap_or(&settings.package.compression)
        .parse()?;

    let image = ImageWrapper::new(&args.kernel, &args.architecture, &args.platform)?
        .with_config(&args.config)?;
    let filesystem = args
        .filesystem
        .as_ref()
        .map(FilesystemWrapper::new)
        .transpose()?;
    let artifacts = args
        .artifacts
        .iter()
        .map(ArtifactWrapper::new)
        .collect::<Result<Vec<_>, _>>()?;

    let output = match &args.output {
        Some(path) => path.clone(),
        None => settings.package.output_dir.join(image.file_name()),
    };

    let options = PackageOptions {
        algorithm,
        compression,
        ref_name: args.ref_name.clone(),
        ..Default::default()
    };

    let mut packager = Packager::new(image, options).with_artifacts(artifacts);
    if let Some(fs) = filesystem {
        packager = packager.with_filesystem(fs);
    }

    Ok((packager, output))
}

pub async fn execute(
    args: PackageArgs,
    settings: &Settings,
) -> Result<(), Box<dyn std::error::Error>> {
    let (packager, output) = plan(&args, settings)?;

    if !args.quiet {
        println!("Packaging {} -> {}", args.kernel.display(), output.display());
    }

    let result = tokio::task::spawn_blocking(move || packager.package(&output)).await??;

    if args.quiet {
        println!("{}", result.manifest.digest);
    } else {
        print_result(&result);
    }

    Ok(())
}

fn print_result(result: &PackageResult) {
    let mut table = new_table(&["BLOB", "MEDIA TYPE", "DIGEST", "SIZE"]);
    table.add_row([
        "manifest".to_string(),
        result.manifest.media_type.clone(),
        result.manifest.digest.to_string(),
        format_bytes(result.manifest.size),
    ]);
    table.add_row([
        "config".to_string(),
        result.config.media_type.clone(),
        result.config.digest.to_string(),
        format_bytes(result.config.size),
    ]);
    for layer in &result.layers {
        table.add_row([
            "layer".to_string(),
            layer.media_type.clone(),
            layer.digest.to_string(),
            format_bytes(layer.size),
        ]);
    }
    println!("{table}");
    println!(
        "Archive: {} ({})",
        result.archive.display(),
        format_bytes(result.archive_size)
    );
}
