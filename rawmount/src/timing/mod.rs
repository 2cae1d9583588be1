//! Frame timing: rate statistics, CFR target resolution, and the
//! timestamp→output-index mapping that drives entry generation.
//!
//! Source containers stamp frames on a free-running clock, so cadence is
//! never exactly constant. The timeline derives median and average rates
//! from the inter-frame durations, resolves the configured CFR target, and
//! maps every source timestamp onto a dense output index range, duplicating
//! or dropping frames where the cadences disagree.

use tracing::warn;

use crate::source::Timestamp;

/// Median and average frame rate derived from timestamps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRateStats {
    pub median_fps: f32,
    pub average_fps: f32,
}

/// One output slot: its index and the source frame that fills it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFrame {
    pub index: u32,
    pub source_timestamp: Timestamp,
}

/// The resolved output sequence with duplicate/drop accounting.
#[derive(Debug, Clone, Default)]
pub struct OutputMap {
    pub frames: Vec<OutputFrame>,
    pub duplicated: u32,
    pub dropped: u32,
}

/// Per-source timing state.
#[derive(Debug, Clone)]
pub struct FrameTimeline {
    timestamps: Vec<Timestamp>,
    pub median_fps: f32,
    pub average_fps: f32,
    /// CFR-resolved target rate; drives naming, timecode, and the WAV.
    pub target_fps: f32,
    apply_cfr: bool,
}

impl FrameTimeline {
    /// Build a timeline from (possibly unsorted) source timestamps.
    pub fn new(mut timestamps: Vec<Timestamp>, cfr_target: &str, apply_cfr: bool) -> Self {
        timestamps.sort_unstable();

        let stats = frame_rate_stats(&timestamps);
        let target_fps = resolve_cfr_target(stats.median_fps, cfr_target, apply_cfr);

        Self {
            timestamps,
            median_fps: stats.median_fps,
            average_fps: stats.average_fps,
            target_fps,
            apply_cfr,
        }
    }

    /// Map source timestamps onto output indices.
    ///
    /// With CFR active, every source frame lands on
    /// `round((t - t0) * fps / 1e9)`; gaps are filled by repeating the
    /// arriving frame (duplication) and a frame whose slot is already taken
    /// is dropped. Without CFR the mapping is the identity.
    pub fn output_map(&self) -> OutputMap {
        let mut map = OutputMap::default();

        let Some(&t0) = self.timestamps.first() else {
            return map;
        };

        if !self.apply_cfr || self.target_fps <= 0.0 {
            map.frames = self
                .timestamps
                .iter()
                .enumerate()
                .map(|(i, &ts)| OutputFrame {
                    index: i as u32,
                    source_timestamp: ts,
                })
                .collect();
            return map;
        }

        let mut next: i64 = 0;
        for &ts in &self.timestamps {
            let pts = frame_index_for_timestamp(ts, t0, self.target_fps);
            if pts < 0 {
                continue;
            }
            if pts < next {
                map.dropped += 1;
                continue;
            }

            map.duplicated += (pts - next) as u32;
            for index in next..=pts {
                map.frames.push(OutputFrame {
                    index: index as u32,
                    source_timestamp: ts,
                });
            }
            next = pts + 1;
        }

        map
    }
}

/// Rates from inter-frame durations; non-positive durations are discarded.
/// Fewer than two usable frames yield zero rates.
pub fn frame_rate_stats(timestamps: &[Timestamp]) -> FrameRateStats {
    let mut durations: Vec<f64> = timestamps
        .windows(2)
        .map(|w| (w[1] - w[0]) as f64)
        .filter(|&d| d > 0.0)
        .collect();

    if durations.is_empty() {
        return FrameRateStats {
            median_fps: 0.0,
            average_fps: 0.0,
        };
    }

    let average = durations.iter().sum::<f64>() / durations.len() as f64;

    durations.sort_by(f64::total_cmp);
    let mid = durations.len() / 2;
    let median = if durations.len() % 2 == 0 {
        (durations[mid - 1] + durations[mid]) / 2.0
    } else {
        durations[mid]
    };

    FrameRateStats {
        median_fps: (1e9 / median) as f32,
        average_fps: (1e9 / average) as f32,
    }
}

/// Resolve the configured CFR target against the measured median rate.
pub fn resolve_cfr_target(median_fps: f32, cfr_target: &str, apply_cfr: bool) -> f32 {
    if !apply_cfr || cfr_target.is_empty() {
        return match cfr_target.parse::<f32>() {
            Ok(fps) if fps > 0.0 => fps,
            _ => median_fps,
        };
    }

    match cfr_target {
        "Prefer Integer" => {
            let m = median_fps;
            if m <= 23.0 || m >= 1000.0 {
                m
            } else if m < 24.5 {
                24.0
            } else if m < 26.0 {
                25.0
            } else if m < 33.0 {
                30.0
            } else if m < 49.0 {
                48.0
            } else if m < 52.0 {
                50.0
            } else if m > 56.0 && m < 63.0 {
                60.0
            } else if m > 112.0 && m < 125.0 {
                120.0
            } else if m > 224.0 && m < 250.0 {
                240.0
            } else if m > 448.0 && m < 500.0 {
                480.0
            } else if m > 896.0 {
                960.0
            } else if m >= 63.0 {
                120.0
            } else {
                60.0
            }
        }
        "Prefer Drop Frame" => {
            let m = median_fps;
            if m <= 23.0 || m >= 1000.0 {
                m
            } else if m < 24.5 {
                23.976
            } else if m < 26.0 {
                25.0
            } else if m < 33.0 {
                29.97
            } else if m < 49.0 {
                47.952
            } else if m < 52.0 {
                50.0
            } else if m > 56.0 && m < 63.0 {
                59.94
            } else if m > 112.0 && m < 125.0 {
                119.88
            } else if m > 224.0 && m < 250.0 {
                240.0
            } else if m > 448.0 && m < 500.0 {
                480.0
            } else if m > 896.0 {
                960.0
            } else if m >= 63.0 {
                119.88
            } else {
                59.94
            }
        }
        // "Average (Testing)" historically resolved to the median as well;
        // the label is kept for configs that still carry it.
        "Median (Slowmotion)" | "Average (Testing)" => median_fps,
        other => match other.parse::<f32>() {
            Ok(fps) if fps > 0.0 => fps,
            _ => {
                warn!(cfr_target = other, "Invalid CFR target, using median frame rate");
                median_fps
            }
        },
    }
}

/// Output index a timestamp maps to at `fps`, or -1 for invalid input.
pub fn frame_index_for_timestamp(
    timestamp: Timestamp,
    reference: Timestamp,
    fps: f32,
) -> i64 {
    if fps <= 0.0 {
        return -1;
    }
    let difference = timestamp - reference;
    if difference < 0 {
        return -1;
    }

    let nanoseconds_per_frame = 1e9 / fps as f64;
    (difference as f64 / nanoseconds_per_frame).round() as i64
}

/// Frame rate as a reduced `num/den` fraction over the given base,
/// e.g. `29.97 -> 2997/100`.
pub fn to_fraction(frame_rate: f32, base: i32) -> (i32, i32) {
    if frame_rate <= 0.0 {
        return (0, 1);
    }

    let numerator = (frame_rate as f64 * base as f64).round() as i32;
    let divisor = gcd(numerator.unsigned_abs(), base.unsigned_abs()).max(1) as i32;
    (numerator / divisor, base / divisor)
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Timestamps at a fixed interval in nanoseconds.
    fn cadence(count: usize, interval_ns: i64) -> Vec<Timestamp> {
        (0..count as i64).map(|i| i * interval_ns).collect()
    }

    #[test]
    fn test_stats_constant_cadence() {
        let stats = frame_rate_stats(&cadence(300, 33_333_333));
        assert!((stats.median_fps - 30.0).abs() < 0.01);
        assert!((stats.average_fps - 30.0).abs() < 0.01);
    }

    #[test]
    fn test_stats_median_resists_outliers() {
        // One long stall barely moves the median but drags the average.
        let mut ts = cadence(100, 33_333_333);
        for t in ts.iter_mut().skip(50) {
            *t += 1_000_000_000;
        }
        let stats = frame_rate_stats(&ts);
        assert!((stats.median_fps - 30.0).abs() < 0.01);
        assert!(stats.average_fps < 30.0);
    }

    #[test]
    fn test_stats_too_few_frames() {
        assert_eq!(frame_rate_stats(&[]).median_fps, 0.0);
        assert_eq!(frame_rate_stats(&[1000]).median_fps, 0.0);
    }

    #[test]
    fn test_prefer_integer_bands() {
        for (median, expected) in [
            (22.0, 22.0), // below the band floor, kept as-is
            (23.9, 24.0),
            (25.1, 25.0),
            (29.5, 30.0),
            (47.0, 48.0),
            (50.5, 50.0),
            (59.9, 60.0),
            (119.0, 120.0),
            (239.0, 240.0),
            (479.0, 480.0),
            (930.0, 960.0),
        ] {
            assert_eq!(
                resolve_cfr_target(median, "Prefer Integer", true),
                expected,
                "median {}",
                median
            );
        }
    }

    #[test]
    fn test_prefer_drop_frame_bands() {
        for (median, expected) in [
            (23.9, 23.976),
            (29.5, 29.97),
            (47.0, 47.952),
            (59.9, 59.94),
            (119.0, 119.88),
        ] {
            assert_eq!(
                resolve_cfr_target(median, "Prefer Drop Frame", true),
                expected,
                "median {}",
                median
            );
        }
    }

    #[test]
    fn test_median_and_average_presets() {
        assert_eq!(resolve_cfr_target(31.4, "Median (Slowmotion)", true), 31.4);
        assert_eq!(resolve_cfr_target(31.4, "Average (Testing)", true), 31.4);
    }

    #[test]
    fn test_numeric_and_invalid_targets() {
        assert_eq!(resolve_cfr_target(30.0, "23.976", true), 23.976);
        assert_eq!(resolve_cfr_target(30.0, "fast", true), 30.0);
        assert_eq!(resolve_cfr_target(30.0, "Prefer Integer", false), 30.0);
        assert_eq!(resolve_cfr_target(30.0, "24", false), 24.0);
    }

    #[test]
    fn test_cfr_map_constant_cadence_is_identity() {
        let timeline = FrameTimeline::new(cadence(300, 33_333_333), "Prefer Integer", true);
        assert_eq!(timeline.target_fps, 30.0);

        let map = timeline.output_map();
        assert_eq!(map.frames.len(), 300);
        assert_eq!(map.duplicated, 0);
        assert_eq!(map.dropped, 0);
        for (i, frame) in map.frames.iter().enumerate() {
            assert_eq!(frame.index, i as u32);
            assert_eq!(
                frame_index_for_timestamp(frame.source_timestamp, 0, 30.0),
                i as i64
            );
        }
    }

    #[test]
    fn test_cfr_map_fills_gap_by_duplication() {
        // Frames at slots 0, 1, 3: slot 2 is missing.
        let period = 33_333_333i64;
        let timeline = FrameTimeline::new(vec![0, period, 3 * period], "30", true);

        let map = timeline.output_map();
        assert_eq!(map.frames.len(), 4);
        assert_eq!(map.duplicated, 1);
        assert_eq!(map.dropped, 0);
        // The gap slot repeats the arriving frame's timestamp.
        assert_eq!(map.frames[2].source_timestamp, map.frames[3].source_timestamp);
        assert_eq!(map.frames[3].index, 3);
    }

    #[test]
    fn test_cfr_map_drops_crowded_slot() {
        // Two frames land in slot 1.
        let period = 33_333_333i64;
        let timeline = FrameTimeline::new(
            vec![0, period, period + 1_000_000, 2 * period],
            "30",
            true,
        );

        let map = timeline.output_map();
        assert_eq!(map.frames.len(), 3);
        assert_eq!(map.dropped, 1);
        // The first arrival keeps the slot.
        assert_eq!(map.frames[1].source_timestamp, period);
    }

    #[test]
    fn test_no_cfr_is_one_entry_per_frame() {
        let timeline = FrameTimeline::new(vec![5, 100, 7_000_000_000], "", false);
        let map = timeline.output_map();
        assert_eq!(map.frames.len(), 3);
        assert_eq!(map.frames[2].index, 2);
    }

    #[test]
    fn test_to_fraction() {
        assert_eq!(to_fraction(29.97, 1000), (2997, 100));
        assert_eq!(to_fraction(30.0, 1000), (30, 1));
        assert_eq!(to_fraction(23.976, 1000), (2997, 125));
        assert_eq!(to_fraction(0.0, 1000), (0, 1));
    }

    #[test]
    fn test_drop_frame_scenario_has_duplication() {
        // A slightly slow cadence conformed to 29.97 drifts behind the
        // output clock until a slot has to be filled twice.
        let period = (1e9 / 29.8) as i64;
        let timeline = FrameTimeline::new(cadence(299, period), "Prefer Drop Frame", true);
        assert_eq!(timeline.target_fps, 29.97);

        let map = timeline.output_map();
        assert!(map.duplicated >= 1);
        assert_eq!(map.dropped, 0);

        // Duplicated slots are observable as consecutive entries sharing a
        // source timestamp.
        let mut shared = false;
        for pair in map.frames.windows(2) {
            if pair[0].source_timestamp == pair[1].source_timestamp {
                shared = true;
                break;
            }
        }
        assert!(shared);
    }
}
