//! Camera metadata consumed from source decoders.

use crate::shading::ShadingMap;

/// Bayer mosaic phase of the sensor (or of a remosaiced output).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfaPhase {
    Rggb,
    Bggr,
    Grbg,
    Gbrg,
}

impl CfaPhase {
    /// Parse the container's arrangement label, case-insensitively.
    pub fn parse(label: &str) -> Option<CfaPhase> {
        match label.to_ascii_lowercase().as_str() {
            "rggb" => Some(CfaPhase::Rggb),
            "bggr" => Some(CfaPhase::Bggr),
            "grbg" => Some(CfaPhase::Grbg),
            "gbrg" => Some(CfaPhase::Gbrg),
            _ => None,
        }
    }

    /// DNG CFAPattern bytes (0 = red, 1 = green, 2 = blue), row major.
    pub fn pattern(self) -> [u8; 4] {
        match self {
            CfaPhase::Rggb => [0, 1, 1, 2],
            CfaPhase::Bggr => [2, 1, 1, 0],
            CfaPhase::Grbg => [1, 0, 2, 1],
            CfaPhase::Gbrg => [1, 2, 0, 1],
        }
    }

    /// Positions of the two green sites within the 2x2 block.
    pub fn green_indices(self) -> (usize, usize) {
        match self {
            CfaPhase::Rggb | CfaPhase::Bggr => (1, 2),
            CfaPhase::Grbg | CfaPhase::Gbrg => (0, 3),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CfaPhase::Rggb => "rggb",
            CfaPhase::Bggr => "bggr",
            CfaPhase::Grbg => "grbg",
            CfaPhase::Gbrg => "gbrg",
        }
    }
}

/// Device orientation at capture time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScreenOrientation {
    Portrait,
    ReversePortrait,
    #[default]
    Landscape,
    ReverseLandscape,
    Invalid,
}

/// Container-level camera description, constant across a recording.
#[derive(Debug, Clone)]
pub struct CameraConfiguration {
    /// Bayer arrangement label, e.g. "rggb". Unknown labels fail synthesis.
    pub sensor_arrangement: String,
    pub color_matrix1: [f32; 9],
    pub color_matrix2: [f32; 9],
    pub forward_matrix1: [f32; 9],
    pub forward_matrix2: [f32; 9],
    /// Illuminant labels, e.g. "standarda" / "d65".
    pub color_illuminant1: String,
    pub color_illuminant2: String,
    /// Static sensor levels, used when levels mode is "Static".
    pub black_level: [f32; 4],
    pub white_level: f32,
    /// Camera model string reported by the recorder.
    pub camera_model: String,
    /// Whether the sensor output is mirrored.
    pub flipped: bool,
}

impl Default for CameraConfiguration {
    fn default() -> Self {
        Self {
            sensor_arrangement: "bggr".to_string(),
            color_matrix1: [0.0; 9],
            color_matrix2: [0.0; 9],
            forward_matrix1: [0.0; 9],
            forward_matrix2: [0.0; 9],
            color_illuminant1: String::new(),
            color_illuminant2: String::new(),
            black_level: [0.0; 4],
            white_level: 1023.0,
            camera_model: String::new(),
            flipped: false,
        }
    }
}

/// Per-frame metadata from the source decoder.
///
/// Invariants: `black[i] < white` for all channels, and a present shading
/// map's planes all hold `width x height` samples (enforced by
/// [`ShadingMap::new`]).
#[derive(Debug, Clone)]
pub struct CameraFrameMetadata {
    pub width: u32,
    pub height: u32,
    /// Full sensor dimensions; the frame may be a centered window of them.
    pub original_width: u32,
    pub original_height: u32,
    pub dynamic_black_level: [f32; 4],
    pub dynamic_white_level: f32,
    pub as_shot_neutral: [f32; 3],
    pub iso: u32,
    pub exposure_time_ns: u64,
    pub orientation: ScreenOrientation,
    pub shading_map: Option<ShadingMap>,
    /// Set for quad-Bayer sensors whose clusters have not been collapsed.
    pub needs_remosaic: bool,
}

impl Default for CameraFrameMetadata {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            original_width: 0,
            original_height: 0,
            dynamic_black_level: [0.0; 4],
            dynamic_white_level: 1023.0,
            as_shot_neutral: [1.0, 1.0, 1.0],
            iso: 100,
            exposure_time_ns: 10_000_000,
            orientation: ScreenOrientation::Landscape,
            shading_map: None,
            needs_remosaic: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cfa_parse() {
        assert_eq!(CfaPhase::parse("rggb"), Some(CfaPhase::Rggb));
        assert_eq!(CfaPhase::parse("BGGR"), Some(CfaPhase::Bggr));
        assert_eq!(CfaPhase::parse("monochrome"), None);
    }

    #[test]
    fn test_cfa_pattern_and_greens() {
        assert_eq!(CfaPhase::Rggb.pattern(), [0, 1, 1, 2]);
        assert_eq!(CfaPhase::Gbrg.pattern(), [1, 2, 0, 1]);
        assert_eq!(CfaPhase::Rggb.green_indices(), (1, 2));
        assert_eq!(CfaPhase::Grbg.green_indices(), (0, 3));
    }
}
