//! `rawmount info` - probe a source.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use super::RenderArgs;

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Source to probe (a DNG sequence directory).
    pub source: PathBuf,

    #[command(flatten)]
    pub render: RenderArgs,
}

pub async fn run(args: InfoArgs) -> Result<()> {
    let config = args.render.to_config();
    let fs = super::open_source(&args.source, config, &args.render).await?;

    let info = fs.file_info();
    let entries = fs.list_files("");
    let total_bytes: u64 = entries.iter().map(|e| e.size).sum();

    println!("source:      {}", args.source.display());
    println!("entries:     {}", entries.len());
    println!("resolution:  {}x{}", info.width, info.height);
    println!(
        "frame rate:  {:.3} fps (median {:.3}, average {:.3})",
        info.fps, info.median_fps, info.average_fps
    );
    println!("frames:      {} source", info.total_frames);
    println!(
        "conform:     {} duplicated, {} dropped",
        info.duplicated_frames, info.dropped_frames
    );
    println!("total size:  {:.1} MiB", total_bytes as f64 / (1024.0 * 1024.0));

    Ok(())
}
