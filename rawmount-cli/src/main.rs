//! Command-line host for rawmount.
//!
//! Drives the library's public surface without an OS virtualization layer:
//! `info` probes a source and prints its timing summary, `extract` renders
//! every virtual entry into a real directory. This build bundles only the
//! directory-backed DNG sequence decoder; MCRAW and DirectLog decoders are
//! separate bindings.

mod commands;
mod sequence;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rawmount", version, about = "Present raw captures as DNG sequences")]
struct Cli {
    /// Log filter, e.g. "info" or "rawmount=debug".
    #[arg(long, default_value = "info", global = true)]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Probe a source and print its timing and geometry.
    Info(commands::info::InfoArgs),

    /// Render all virtual entries of a source into a directory.
    Extract(commands::extract::ExtractArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match cli.command {
            Command::Info(args) => commands::info::run(args).await,
            Command::Extract(args) => commands::extract::run(args).await,
        }
    })
}
