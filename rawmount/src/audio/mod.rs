//! Audio alignment and WAV rendering for sources that carry sound.
//!
//! MCRAW recordings start their audio and video clocks independently; the
//! first audio chunk rarely lands exactly on the first video frame. The sync
//! pass trims leading audio (audio started late) or prepends silence (audio
//! started early) so sample 0 of the rendered WAV coincides with frame 0.

mod wav;

pub use wav::render_wav;

use tracing::warn;

use crate::source::{AudioChunk, Timestamp};

/// Largest tolerated audio/video start offset. Bigger drifts indicate a
/// broken recording and are left untouched.
const MAX_DRIFT_MS: f32 = 1000.0;

/// Align `chunks` so their first sample coincides with `video_start`.
///
/// Positive drift (audio begins after video) trims whole and partial chunks
/// from the front, advancing the trimmed chunk's timestamp; negative drift
/// prepends one chunk of silence. Chunks hold interleaved samples, so sample
/// counts are always a multiple of `num_channels`.
pub fn sync_audio(
    video_start: Timestamp,
    chunks: &mut Vec<AudioChunk>,
    sample_rate: u32,
    num_channels: u16,
) {
    let Some(first) = chunks.first() else {
        return;
    };

    let drift_ms = (first.timestamp - video_start) as f32 * 1e-6;
    if drift_ms.abs() > MAX_DRIFT_MS {
        warn!(drift_ms, "Audio drift too large, not syncing audio");
        return;
    }

    if drift_ms > 0.0 {
        let frames_to_remove = (drift_ms * sample_rate as f32 / 1000.0).round() as usize;
        let mut samples_to_remove = frames_to_remove * num_channels as usize;

        while samples_to_remove > 0 {
            let Some(chunk) = chunks.first_mut() else {
                break;
            };

            if chunk.samples.len() <= samples_to_remove {
                samples_to_remove -= chunk.samples.len();
                chunks.remove(0);
            } else {
                chunk.samples.drain(..samples_to_remove);
                samples_to_remove = 0;
            }
        }

        // What remains plays from frame 0 on.
        if let Some(first) = chunks.first_mut() {
            first.timestamp = video_start;
        }
    } else if drift_ms < 0.0 {
        let silence_ms = -drift_ms;
        let silence_frames = (silence_ms * sample_rate as f32 / 1000.0).round() as usize;
        let silence = AudioChunk {
            timestamp: video_start,
            samples: vec![0; silence_frames * num_channels as usize],
        };

        let shift_ns = (silence_ms * 1e6) as i64;
        for chunk in chunks.iter_mut() {
            chunk.timestamp += shift_ns;
        }
        chunks.insert(0, silence);
    }
}

/// Flatten synced chunks into one interleaved sample stream.
pub fn interleave(chunks: &[AudioChunk]) -> Vec<i16> {
    let total: usize = chunks.iter().map(|c| c.samples.len()).sum();
    let mut out = Vec::with_capacity(total);
    for chunk in chunks {
        out.extend_from_slice(&chunk.samples);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: u32 = 48000;

    fn chunk(timestamp: Timestamp, frames: usize, channels: u16) -> AudioChunk {
        AudioChunk {
            timestamp,
            samples: vec![7; frames * channels as usize],
        }
    }

    #[test]
    fn test_positive_drift_trims_leading_samples() {
        // Audio starts 10ms after video: 480 frames of stereo to drop.
        let mut chunks = vec![chunk(10_000_000, 1000, 2)];
        sync_audio(0, &mut chunks, SAMPLE_RATE, 2);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].samples.len(), (1000 - 480) * 2);
        assert_eq!(chunks[0].timestamp, 0);
    }

    #[test]
    fn test_positive_drift_spanning_chunks() {
        // 20ms drift = 960 frames; first chunk only has 400.
        let mut chunks = vec![chunk(20_000_000, 400, 1), chunk(30_000_000, 1000, 1)];
        sync_audio(0, &mut chunks, SAMPLE_RATE, 1);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].samples.len(), 1000 - 560);
    }

    #[test]
    fn test_negative_drift_prepends_silence() {
        // Audio starts 5ms before the video.
        let mut chunks = vec![chunk(-5_000_000, 100, 2)];
        sync_audio(0, &mut chunks, SAMPLE_RATE, 2);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].timestamp, 0);
        assert_eq!(chunks[0].samples.len(), 240 * 2);
        assert!(chunks[0].samples.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_sync_result_within_one_millisecond() {
        for drift_ns in [-900_000_000i64, -3_333_333, 2_500_000, 700_000_000] {
            let mut chunks = vec![chunk(drift_ns, 48000, 1)];
            sync_audio(0, &mut chunks, SAMPLE_RATE, 1);
            let residual_ms = chunks[0].timestamp as f64 * 1e-6;
            assert!(
                residual_ms.abs() <= 1.0,
                "drift {} left residual {}ms",
                drift_ns,
                residual_ms
            );
        }
    }

    #[test]
    fn test_excessive_drift_is_left_alone() {
        let mut chunks = vec![chunk(2_000_000_000, 100, 1)];
        let before = chunks.clone();
        sync_audio(0, &mut chunks, SAMPLE_RATE, 1);
        assert_eq!(chunks, before);
    }

    #[test]
    fn test_empty_chunks_are_a_noop() {
        let mut chunks: Vec<AudioChunk> = Vec::new();
        sync_audio(0, &mut chunks, SAMPLE_RATE, 2);
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_interleave_concatenates() {
        let chunks = vec![
            AudioChunk {
                timestamp: 0,
                samples: vec![1, 2],
            },
            AudioChunk {
                timestamp: 1,
                samples: vec![3],
            },
        ];
        assert_eq!(interleave(&chunks), vec![1, 2, 3]);
    }
}
