pub mod extract;
pub mod info;

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Args;
use rawmount::render::{RenderConfig, RenderOptions};
use rawmount::vfs::DngSequenceFileSystem;
use rawmount::{ArtifactCache, Pools, VirtualFileSystem};

use crate::sequence::DirDngSequence;

/// Render options shared by the commands.
#[derive(Args, Debug, Clone)]
pub struct RenderArgs {
    /// Constant-frame-rate preset or numeric target.
    #[arg(long, default_value = "Prefer Drop Frame")]
    pub cfr: String,

    /// Enable CFR conformance.
    #[arg(long)]
    pub conform: bool,

    /// Draft-mode downscale divisor (even, >= 2).
    #[arg(long)]
    pub draft: Option<u32>,

    /// Center crop, "WxH".
    #[arg(long)]
    pub crop: Option<String>,

    /// Log transform: "Keep Input" or "Reduce by {2|4|6|8}bit".
    #[arg(long)]
    pub log_transform: Option<String>,

    /// Exposure compensation: EV value or keyframes ("start:-2, end:2").
    #[arg(long, default_value = "")]
    pub exposure: String,

    /// Source frame rate assumed for timestampless sequences.
    #[arg(long, default_value_t = 24.0)]
    pub fps: f64,
}

impl RenderArgs {
    pub fn to_config(&self) -> RenderConfig {
        let mut options = RenderOptions::NONE;
        if self.conform {
            options |= RenderOptions::FRAMERATE_CONVERSION;
        }
        if self.draft.is_some() {
            options |= RenderOptions::DRAFT;
        }
        if self.crop.is_some() {
            options |= RenderOptions::CROPPING;
        }
        if self.log_transform.is_some() {
            options |= RenderOptions::LOG_TRANSFORM;
        }

        RenderConfig {
            options,
            draft_scale: self.draft.unwrap_or(1),
            cfr_target: self.cfr.clone(),
            crop_target: self.crop.clone().unwrap_or_default(),
            log_transform: self.log_transform.clone().unwrap_or_default(),
            exposure_compensation: self.exposure.clone(),
            ..RenderConfig::default()
        }
    }
}

/// Open the filesystem for a source path with the decoders this build has.
pub async fn open_source(
    source: &Path,
    config: RenderConfig,
    args: &RenderArgs,
) -> Result<Arc<dyn VirtualFileSystem>> {
    let pools = Arc::new(Pools::new());
    let cache = Arc::new(ArtifactCache::new(
        rawmount::cache::DEFAULT_CACHE_SIZE_BYTES,
    ));

    if source.is_dir() {
        let opener = DirDngSequence::opener(source.to_path_buf(), args.fps);
        let fs: Arc<dyn VirtualFileSystem> = DngSequenceFileSystem::new(
            pools,
            cache,
            opener,
            source.to_string_lossy().into_owned(),
            config,
        )
        .await?;
        return Ok(fs);
    }

    match source.extension().and_then(|e| e.to_str()) {
        Some("mcraw") => bail!("this build has no MCRAW decoder binding"),
        Some("mov") | Some("mp4") => bail!("this build has no DirectLog decoder binding"),
        _ => bail!("unsupported source: {}", source.display()),
    }
}
