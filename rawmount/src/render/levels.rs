//! Sensor level overrides.
//!
//! The levels string selects which black/white levels linearization uses:
//! the frame's dynamic values ("Dynamic" or empty), the camera's static
//! calibration ("Static"), or user-supplied values in `white/black` form
//! where black is one value for all channels or four comma-separated ones.
//! A malformed string falls back to dynamic levels with a warning.

use tracing::warn;

use crate::source::{CameraConfiguration, CameraFrameMetadata};

#[derive(Debug, Clone, PartialEq)]
pub enum LevelMode {
    Dynamic,
    Static,
    Custom { white: f32, black: [f32; 4] },
}

/// Parse the levels selector.
pub fn parse_levels(levels: &str) -> LevelMode {
    match levels {
        "" | "Dynamic" => return LevelMode::Dynamic,
        "Static" => return LevelMode::Static,
        _ => {}
    }

    let Some((white_str, black_str)) = levels.split_once('/') else {
        warn!(levels, "Levels string has no '/' separator, using dynamic levels");
        return LevelMode::Dynamic;
    };

    let Ok(white) = white_str.trim().parse::<f32>() else {
        warn!(levels, "Bad white level, using dynamic levels");
        return LevelMode::Dynamic;
    };

    let mut black = [0.0f32; 4];
    if black_str.contains(',') {
        for (i, token) in black_str.split(',').take(4).enumerate() {
            match token.trim().parse::<f32>() {
                Ok(v) => black[i] = v,
                Err(_) => {
                    warn!(levels, "Bad black level component, using dynamic levels");
                    return LevelMode::Dynamic;
                }
            }
        }
    } else {
        match black_str.trim().parse::<f32>() {
            Ok(v) => black = [v; 4],
            Err(_) => {
                warn!(levels, "Bad black level, using dynamic levels");
                return LevelMode::Dynamic;
            }
        }
    }

    LevelMode::Custom { white, black }
}

/// Resolve the black levels (per channel) and white level a frame should be
/// linearized against.
pub fn resolve_levels(
    mode: &LevelMode,
    metadata: &CameraFrameMetadata,
    camera: &CameraConfiguration,
) -> ([f32; 4], f32) {
    match mode {
        LevelMode::Dynamic => (metadata.dynamic_black_level, metadata.dynamic_white_level),
        LevelMode::Static => (camera.black_level, camera.white_level),
        LevelMode::Custom { white, black } => (*black, *white),
    }
}
