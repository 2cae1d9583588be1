//! Per-source calibration sidecar.
//!
//! A source file may ship with a JSON sidecar (same stem, `.json`) that
//! overrides decoder-provided color metadata. Only present fields override;
//! keys prefixed with `_` and anything unrecognized are ignored. Matrix and
//! vector fields accept either a numeric array or a whitespace-separated
//! string, since both occur in sidecars exported by other tools.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{error, warn};

use super::CfaPhase;

/// Parsed calibration overrides. Each field is applied only when present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationData {
    pub color_matrix1: Option<[f32; 9]>,
    pub color_matrix2: Option<[f32; 9]>,
    pub forward_matrix1: Option<[f32; 9]>,
    pub forward_matrix2: Option<[f32; 9]>,
    pub as_shot_neutral: Option<[f32; 3]>,
    pub cfa_phase: Option<CfaPhase>,
}

/// A matrix/vector field as it appears on disk.
#[derive(Deserialize)]
#[serde(untagged)]
enum FlexArray {
    Numbers(Vec<f32>),
    Text(String),
}

impl FlexArray {
    fn into_values(self) -> Vec<f32> {
        match self {
            FlexArray::Numbers(values) => values,
            FlexArray::Text(text) => text
                .split_whitespace()
                .filter_map(|token| token.parse().ok())
                .collect(),
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawCalibration {
    color_matrix1: Option<FlexArray>,
    color_matrix2: Option<FlexArray>,
    forward_matrix1: Option<FlexArray>,
    forward_matrix2: Option<FlexArray>,
    as_shot_neutral: Option<FlexArray>,
    cfa_phase: Option<String>,
}

fn fixed<const N: usize>(values: Vec<f32>, field: &str) -> Option<[f32; N]> {
    if values.len() < N {
        warn!(field, got = values.len(), want = N, "Calibration field too short, ignoring");
        return None;
    }
    let mut out = [0.0f32; N];
    out.copy_from_slice(&values[..N]);
    Some(out)
}

impl CalibrationData {
    /// Path of the sidecar belonging to `source` (same stem, `.json`).
    pub fn sidecar_path(source: &Path) -> PathBuf {
        source.with_extension("json")
    }

    /// Load the sidecar next to `source`, if one exists and parses.
    ///
    /// Parse failures are logged and reported as absence, per the
    /// configuration-error policy.
    pub fn load_for_source(source: &Path) -> Option<CalibrationData> {
        let path = Self::sidecar_path(source);
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(&path) {
            Ok(text) => Self::parse(&text),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Could not read calibration sidecar");
                None
            }
        }
    }

    /// Parse calibration JSON. Returns `None` when nothing usable is inside.
    pub fn parse(json: &str) -> Option<CalibrationData> {
        let raw: RawCalibration = match serde_json::from_str(json) {
            Ok(raw) => raw,
            Err(e) => {
                error!(error = %e, "Error parsing calibration JSON");
                return None;
            }
        };

        let cfa_phase = raw.cfa_phase.as_deref().and_then(|label| {
            let parsed = CfaPhase::parse(label);
            if parsed.is_none() {
                warn!(label, "Unknown cfaPhase in calibration, ignoring");
            }
            parsed
        });

        let data = CalibrationData {
            color_matrix1: raw
                .color_matrix1
                .and_then(|v| fixed(v.into_values(), "colorMatrix1")),
            color_matrix2: raw
                .color_matrix2
                .and_then(|v| fixed(v.into_values(), "colorMatrix2")),
            forward_matrix1: raw
                .forward_matrix1
                .and_then(|v| fixed(v.into_values(), "forwardMatrix1")),
            forward_matrix2: raw
                .forward_matrix2
                .and_then(|v| fixed(v.into_values(), "forwardMatrix2")),
            as_shot_neutral: raw
                .as_shot_neutral
                .and_then(|v| fixed(v.into_values(), "asShotNeutral")),
            cfa_phase,
        };

        if data == CalibrationData::default() {
            warn!("No valid calibration data found in JSON");
            return None;
        }

        Some(data)
    }
}
