//! Exposure compensation keyframes.
//!
//! The exposure string is either a single EV value or a comma-separated
//! keyframe list of `position:value` pairs, with `start`/`end` accepted for
//! 0 and 1. Evaluation is a cubic Hermite spline whose endpoint slopes
//! follow the segment slopes; interior keyframes only keep a slope where the
//! curve is strictly monotonic through them, so local extrema stay flat.

use tracing::{debug, warn};

/// One parsed keyframe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureKeyframe {
    /// Normalized clip position in `[0, 1]`.
    pub position: f32,
    /// EV shift at this position.
    pub value: f32,
    /// Hermite tangent, assigned by the parse rules.
    pub derivative: f32,
}

/// A sorted, slope-annotated keyframe curve.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureKeyframes {
    keyframes: Vec<ExposureKeyframe>,
}

impl ExposureKeyframes {
    /// Parse a keyframe list. Returns `None` for input that contains no
    /// valid `position:value` pair (including plain static EV strings).
    pub fn parse(input: &str) -> Option<ExposureKeyframes> {
        if input.is_empty() {
            return None;
        }

        let mut keyframes = Vec::new();

        for pair in input.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }

            let Some((pos_str, val_str)) = pair.split_once(':') else {
                // Not keyframe syntax; plain EV strings land here.
                continue;
            };

            let position = match pos_str.trim() {
                "start" => 0.0f32,
                "end" => 1.0f32,
                other => match other.parse() {
                    Ok(p) => p,
                    Err(_) => {
                        warn!(pair, "Invalid keyframe position");
                        continue;
                    }
                },
            };

            if !(0.0..=1.0).contains(&position) {
                warn!(position, "Keyframe position out of range, skipping");
                continue;
            }

            let value = match val_str.trim().parse::<f32>() {
                Ok(v) => v,
                Err(_) => {
                    warn!(pair, "Invalid keyframe value");
                    continue;
                }
            };

            keyframes.push(ExposureKeyframe {
                position,
                value,
                derivative: 0.0,
            });
        }

        if keyframes.is_empty() {
            return None;
        }

        keyframes.sort_by(|a, b| a.position.total_cmp(&b.position));
        assign_derivatives(&mut keyframes);

        debug!(count = keyframes.len(), "Parsed exposure keyframes");
        Some(ExposureKeyframes { keyframes })
    }

    pub fn keyframes(&self) -> &[ExposureKeyframe] {
        &self.keyframes
    }

    /// EV at a normalized position, clamped to `[0, 1]`.
    pub fn exposure_at(&self, position: f32) -> f32 {
        if self.keyframes.is_empty() {
            return 0.0;
        }

        let position = position.clamp(0.0, 1.0);

        if self.keyframes.len() == 1 {
            return self.keyframes[0].value;
        }
        if position <= self.keyframes[0].position {
            return self.keyframes[0].value;
        }
        let last = self.keyframes.last().unwrap();
        if position >= last.position {
            return last.value;
        }

        for pair in self.keyframes.windows(2) {
            let (k0, k1) = (&pair[0], &pair[1]);
            if position >= k0.position && position <= k1.position {
                let t = (position - k0.position) / (k1.position - k0.position);
                return hermite(t, k0, k1);
            }
        }

        last.value
    }

    /// EV at frame `index` of an output with `total_frames` frames.
    pub fn exposure_at_frame(&self, index: usize, total_frames: usize) -> f32 {
        if total_frames <= 1 {
            return self.exposure_at(0.0);
        }
        self.exposure_at(index as f32 / (total_frames - 1) as f32)
    }
}

/// Slope rules: endpoints take the adjacent segment slope, strictly
/// monotonic interior keyframes average the two segment slopes, everything
/// else (local extrema in particular) is flat.
fn assign_derivatives(keyframes: &mut [ExposureKeyframe]) {
    let n = keyframes.len();

    for i in 0..n {
        let kf = keyframes[i];

        if kf.position == 0.0 && i + 1 < n {
            let next = keyframes[i + 1];
            keyframes[i].derivative = (next.value - kf.value) / (next.position - kf.position);
            continue;
        }

        if kf.position == 1.0 && i > 0 {
            let prev = keyframes[i - 1];
            keyframes[i].derivative = (kf.value - prev.value) / (kf.position - prev.position);
            continue;
        }

        if i > 0 && i + 1 < n {
            let prev = keyframes[i - 1];
            let next = keyframes[i + 1];

            let increasing = prev.value < kf.value && kf.value < next.value;
            let decreasing = prev.value > kf.value && kf.value > next.value;

            if increasing || decreasing {
                let slope_before = (kf.value - prev.value) / (kf.position - prev.position);
                let slope_after = (next.value - kf.value) / (next.position - kf.position);
                keyframes[i].derivative = (slope_before + slope_after) * 0.5;
            }
        }
    }
}

fn hermite(t: f32, k0: &ExposureKeyframe, k1: &ExposureKeyframe) -> f32 {
    let t2 = t * t;
    let t3 = t2 * t;

    let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let h10 = t3 - 2.0 * t2 + t;
    let h01 = -2.0 * t3 + 3.0 * t2;
    let h11 = t3 - t2;

    // Tangents scale with the segment length.
    let interval = k1.position - k0.position;
    let m0 = k0.derivative * interval;
    let m1 = k1.derivative * interval;

    h00 * k0.value + h10 * m0 + h01 * k1.value + h11 * m1
}

/// Parse a static EV string like "0.5" or "-1ev". Returns 0 with a warning
/// for anything unparseable.
pub fn parse_static_ev(input: &str) -> f32 {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return 0.0;
    }

    let numeric = trimmed
        .strip_suffix("ev")
        .or_else(|| trimmed.strip_suffix("EV"))
        .unwrap_or(trimmed)
        .trim();

    match numeric.parse() {
        Ok(v) => v,
        Err(_) => {
            warn!(input, "Bad exposure compensation, using 0ev");
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_sort() {
        let kf = ExposureKeyframes::parse("0.5:0, start:-2, end:2").unwrap();
        let positions: Vec<f32> = kf.keyframes().iter().map(|k| k.position).collect();
        assert_eq!(positions, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_static_string_is_not_keyframes() {
        assert_eq!(ExposureKeyframes::parse("0.5"), None);
        assert_eq!(ExposureKeyframes::parse(""), None);
    }

    #[test]
    fn test_out_of_range_positions_skipped() {
        let kf = ExposureKeyframes::parse("1.5:3, 0.2:1, -0.1:5").unwrap();
        assert_eq!(kf.keyframes().len(), 1);
        assert_eq!(kf.keyframes()[0].position, 0.2);
    }

    #[test]
    fn test_values_hit_at_keyframes() {
        let kf = ExposureKeyframes::parse("start:-2, 0.5:0, end:2").unwrap();
        assert_eq!(kf.exposure_at(0.0), -2.0);
        assert_eq!(kf.exposure_at(0.5), 0.0);
        assert_eq!(kf.exposure_at(1.0), 2.0);
    }

    #[test]
    fn test_monotonic_interior_keyframe_averages_slopes() {
        let kf = ExposureKeyframes::parse("start:-2, 0.5:0, end:2").unwrap();
        // Slopes are 4 on both sides, so the middle tangent is 4.
        assert_eq!(kf.keyframes()[1].derivative, 4.0);
    }

    #[test]
    fn test_extremum_has_zero_derivative() {
        let kf = ExposureKeyframes::parse("start:0, 0.5:2, end:0").unwrap();
        assert_eq!(kf.keyframes()[1].derivative, 0.0);
    }

    #[test]
    fn test_clamps_outside_range() {
        let kf = ExposureKeyframes::parse("0.25:1, 0.75:3").unwrap();
        assert_eq!(kf.exposure_at(0.0), 1.0);
        assert_eq!(kf.exposure_at(1.0), 3.0);
    }

    #[test]
    fn test_monotonic_between_keyframes() {
        let kf = ExposureKeyframes::parse("start:-2, 0.5:0, end:2").unwrap();
        let mut prev = kf.exposure_at(0.0);
        for i in 1..=100 {
            let v = kf.exposure_at(i as f32 / 100.0);
            assert!(v >= prev - 1e-5, "not monotonic at step {}", i);
            prev = v;
        }
        // Strictly between the endpoints midway through a segment.
        let quarter = kf.exposure_at(0.25);
        assert!(quarter > -2.0 && quarter < 0.0);
    }

    #[test]
    fn test_single_keyframe_is_constant() {
        let kf = ExposureKeyframes::parse("0.3:1.5").unwrap();
        assert_eq!(kf.exposure_at(0.0), 1.5);
        assert_eq!(kf.exposure_at(0.9), 1.5);
    }

    #[test]
    fn test_exposure_at_frame_endpoints() {
        let kf = ExposureKeyframes::parse("start:-2, 0.5:0, end:2").unwrap();
        assert_eq!(kf.exposure_at_frame(0, 101), -2.0);
        assert_eq!(kf.exposure_at_frame(50, 101), 0.0);
        assert_eq!(kf.exposure_at_frame(100, 101), 2.0);
    }

    #[test]
    fn test_parse_static_ev() {
        assert_eq!(parse_static_ev("0.5"), 0.5);
        assert_eq!(parse_static_ev("-1ev"), -1.0);
        assert_eq!(parse_static_ev("2EV"), 2.0);
        assert_eq!(parse_static_ev(""), 0.0);
        assert_eq!(parse_static_ev("bright"), 0.0);
    }
}
