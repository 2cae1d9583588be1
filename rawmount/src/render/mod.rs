//! The raw→DNG rendering pipeline: configuration, preprocessing, and
//! per-frame synthesis.

mod keyframes;
mod levels;
mod options;
mod preprocess;
mod remosaic;
mod synth;

pub use keyframes::{parse_static_ev, ExposureKeyframe, ExposureKeyframes};
pub use levels::{parse_levels, resolve_levels, LevelMode};
pub use options::{LogTransform, RenderConfig, RenderOptions, CFA_NO_OVERRIDE};
pub use preprocess::{log_encode_rgb, preprocess_bayer, PreprocessResult};
pub use remosaic::remosaic_rgb_to_bayer;
pub use synth::{
    linearization_table, synthesize_bayer_dng, synthesize_rgb_dng, RenderError, SynthesisContext,
};
