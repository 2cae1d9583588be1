//! `rawmount extract` - render virtual entries into a real directory.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use super::RenderArgs;

#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// Source to read (a DNG sequence directory).
    pub source: PathBuf,

    /// Destination directory; created if missing.
    pub output: PathBuf,

    #[command(flatten)]
    pub render: RenderArgs,
}

pub async fn run(args: ExtractArgs) -> Result<()> {
    let config = args.render.to_config();
    let fs = super::open_source(&args.source, config, &args.render).await?;

    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;

    let entries = fs.list_files("");
    let mut written = 0usize;

    for entry in &entries {
        let bytes = fs
            .read_file(entry, 0, entry.size as usize)
            .await
            .with_context(|| format!("reading {}", entry.name))?;

        let path = args.output.join(&entry.name);
        std::fs::write(&path, &bytes).with_context(|| format!("writing {}", path.display()))?;
        written += 1;
    }

    info!(written, output = %args.output.display(), "Extraction complete");
    Ok(())
}
