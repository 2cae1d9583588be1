//! In-memory fake decoders.
//!
//! The real container parsers live outside this crate, so everything that
//! exercises a virtual filesystem (unit tests, integration tests, example
//! hosts) drives it with these deterministic fakes instead.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::dng::DngImage;
use crate::source::{
    AudioChunk, CameraConfiguration, CameraFrameMetadata, DirectLogSource, DngSequenceSource,
    McrawSource, RawFrame, SequenceFrame, SourceError, Timestamp, VideoInfo,
};

/// Deterministic sample value for a pixel of the frame at `timestamp`.
fn fake_sample(timestamp: Timestamp, index: usize, white: u16) -> u16 {
    let mix = (timestamp as u64)
        .wrapping_mul(0x9e37_79b9)
        .wrapping_add(index as u64 * 31);
    64 + (mix % (white as u64 - 64)) as u16
}

/// Fake MCRAW container: a fixed cadence of 16x16 Bayer frames, optional
/// audio, optional decode failures past the first frame.
#[derive(Clone)]
pub struct FakeMcraw {
    pub camera: CameraConfiguration,
    pub metadata: CameraFrameMetadata,
    pub timestamps: Vec<Timestamp>,
    pub audio: Vec<AudioChunk>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Number of pixel loads across all cloned decoder instances.
    pub load_calls: Arc<AtomicUsize>,
    fail_after_first: bool,
}

impl FakeMcraw {
    pub fn with_frames(count: usize, fps: f64) -> FakeMcraw {
        let interval = if fps > 0.0 { (1e9 / fps) as i64 } else { 0 };
        FakeMcraw {
            camera: CameraConfiguration {
                sensor_arrangement: "rggb".to_string(),
                color_matrix1: [0.9, -0.3, -0.1, -0.4, 1.2, 0.2, -0.1, 0.2, 0.7],
                color_illuminant1: "standarda".to_string(),
                color_illuminant2: "d65".to_string(),
                white_level: 1023.0,
                black_level: [64.0; 4],
                camera_model: "Fake Recorder".to_string(),
                ..CameraConfiguration::default()
            },
            metadata: CameraFrameMetadata {
                width: 16,
                height: 16,
                original_width: 16,
                original_height: 16,
                dynamic_black_level: [64.0; 4],
                dynamic_white_level: 1023.0,
                iso: 400,
                exposure_time_ns: 10_000_000,
                ..CameraFrameMetadata::default()
            },
            timestamps: (0..count as i64).map(|i| i * interval).collect(),
            audio: Vec::new(),
            sample_rate: 48000,
            channels: 2,
            load_calls: Arc::new(AtomicUsize::new(0)),
            fail_after_first: false,
        }
    }

    /// Attach `frames` audio frames starting 2ms after the video.
    pub fn with_audio(mut self, frames: usize) -> FakeMcraw {
        self.audio = vec![AudioChunk {
            timestamp: 2_000_000,
            samples: vec![100; frames * self.channels as usize],
        }];
        self
    }

    /// Keep the scan working but fail pixel loads for every frame except
    /// the first (which sizes the entries).
    pub fn failing_after_scan(mut self) -> FakeMcraw {
        self.fail_after_first = true;
        self
    }

    fn frame_bytes(&self, timestamp: Timestamp) -> Vec<u8> {
        let count = (self.metadata.width * self.metadata.height) as usize;
        let mut out = Vec::with_capacity(count * 2);
        for i in 0..count {
            out.extend_from_slice(&fake_sample(timestamp, i, 1023).to_le_bytes());
        }
        out
    }
}

impl McrawSource for FakeMcraw {
    fn frame_timestamps(&self) -> Vec<Timestamp> {
        self.timestamps.clone()
    }

    fn container_metadata(&self) -> Result<CameraConfiguration, SourceError> {
        Ok(self.camera.clone())
    }

    fn load_frame_metadata(
        &mut self,
        _timestamp: Timestamp,
    ) -> Result<CameraFrameMetadata, SourceError> {
        Ok(self.metadata.clone())
    }

    fn load_frame(&mut self, timestamp: Timestamp) -> Result<RawFrame, SourceError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        if !self.timestamps.contains(&timestamp) {
            return Err(SourceError::FrameNotFound(timestamp));
        }
        if self.fail_after_first && timestamp != self.timestamps[0] {
            return Err(SourceError::Decode("simulated decode failure".to_string()));
        }
        Ok(RawFrame {
            data: self.frame_bytes(timestamp),
            metadata: self.metadata.clone(),
        })
    }

    fn load_audio(&mut self) -> Result<Vec<AudioChunk>, SourceError> {
        Ok(self.audio.clone())
    }

    fn audio_sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn audio_channels(&self) -> u16 {
        self.channels
    }
}

/// Fake DirectLog video: fixed-cadence 16-bit RGB frames.
#[derive(Clone)]
pub struct FakeDirectLog {
    pub info: VideoInfo,
    pub timestamps: Vec<Timestamp>,
}

impl FakeDirectLog {
    pub fn with_frames(count: usize, fps: f64, width: u32, height: u32) -> FakeDirectLog {
        let interval = if fps > 0.0 { (1e9 / fps) as i64 } else { 0 };
        FakeDirectLog {
            info: VideoInfo {
                width,
                height,
                total_frames: count,
                pixel_format: "yuv420p10le".to_string(),
                is_hlg: false,
            },
            timestamps: (0..count as i64).map(|i| i * interval).collect(),
        }
    }
}

impl DirectLogSource for FakeDirectLog {
    fn video_info(&self) -> VideoInfo {
        self.info.clone()
    }

    fn frame_timestamps(&self) -> Vec<Timestamp> {
        self.timestamps.clone()
    }

    fn extract_frame(&mut self, index: usize) -> Result<Vec<u16>, SourceError> {
        if index >= self.timestamps.len() {
            return Err(SourceError::Decode(format!("no frame {}", index)));
        }
        let ts = self.timestamps[index];
        let count = (self.info.width * self.info.height * 3) as usize;
        Ok((0..count).map(|i| fake_sample(ts, i, u16::MAX)).collect())
    }
}

/// Fake DNG sequence: real (tiny) DNG files rendered up front.
#[derive(Clone)]
pub struct FakeDngSequence {
    pub frames: Vec<(SequenceFrame, Vec<u8>)>,
}

impl FakeDngSequence {
    pub fn with_frames(count: usize, fps: f64) -> FakeDngSequence {
        let interval = if fps > 0.0 { (1e9 / fps) as i64 } else { 0 };
        let frames = (0..count as i64)
            .map(|i| {
                let bytes = Self::tiny_dng(i as u16);
                (
                    SequenceFrame {
                        timestamp: i * interval,
                        size: bytes.len() as u64,
                    },
                    bytes,
                )
            })
            .collect();
        FakeDngSequence { frames }
    }

    fn tiny_dng(seed: u16) -> Vec<u8> {
        let samples: Vec<u8> = (0..8u16 * 8)
            .flat_map(|i| (seed.wrapping_mul(257).wrapping_add(i)).to_le_bytes())
            .collect();

        let mut dng = DngImage::new();
        dng.set_image_size(8, 8)
            .set_bits_per_sample(16, 1)
            .set_photometric(crate::dng::tags::PHOTOMETRIC_CFA)
            .set_cfa_pattern([0, 1, 1, 2])
            .set_dng_version([1, 4, 0, 0], [1, 1, 0, 0])
            .set_black_white_levels([0; 4], u16::MAX)
            .set_image_data(samples);
        dng.encode().expect("fake DNG encodes")
    }
}

impl DngSequenceSource for FakeDngSequence {
    fn frames(&self) -> Vec<SequenceFrame> {
        self.frames.iter().map(|(frame, _)| *frame).collect()
    }

    fn extract_frame(&mut self, index: usize) -> Result<Vec<u8>, SourceError> {
        self.frames
            .get(index)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| SourceError::Decode(format!("no frame {}", index)))
    }
}
