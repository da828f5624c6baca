//! CLI command definitions and dispatch.

mod package;
mod push;

use clap::{Parser, Subcommand};
use ukpack_core::Settings;

pub use package::PackageArgs;
pub use push::PushArgs;

/// ukpack - package unikernels as OCI images and push them to registries.
#[derive(Parser)]
#[command(name = "ukpack", version, about)]
pub struct Cli {
    /// Debug logging and full error cause chains
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Package a kernel image as an OCI image archive
    Package(PackageArgs),
    /// Push an image archive to a registry
    Push(PushArgs),
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load()?;
    tracing::debug!(
        output_dir = %settings.package.output_dir.display(),
        server = ?settings.registry.server,
        project = %settings.registry.project,
        "Loaded settings"
    );

    match cli.command {
        Command::Package(args) => package::execute(args, &settings).await,
        Command::Push(args) => push::execute(args, &settings).await,
    }
}
