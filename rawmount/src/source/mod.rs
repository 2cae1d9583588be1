//! Source decoder contracts.
//!
//! The container parsers (MCRAW, DirectLog MOV/MP4, DNG sequences) live
//! outside this crate; the virtual filesystems talk to them through the
//! traits below. An opener produces a fresh decoder instance; decoders are
//! stateful and not shareable, so the IO pool keeps a small pool of opened
//! instances per source and checks them out per read.

mod calibration;
mod metadata;
pub mod testing;

pub use calibration::CalibrationData;
pub use metadata::{CameraConfiguration, CameraFrameMetadata, CfaPhase, ScreenOrientation};

use thiserror::Error;

/// Nanosecond timepoint assigned by a decoder to a frame or audio chunk.
pub type Timestamp = i64;

/// A run of interleaved 16-bit audio samples starting at `timestamp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub timestamp: Timestamp,
    pub samples: Vec<i16>,
}

/// Errors surfaced by source decoders.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open source: {0}")]
    Open(String),

    #[error("failed to decode frame: {0}")]
    Decode(String),

    #[error("frame {0} not found")]
    FrameNotFound(Timestamp),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One frame of a raw Bayer source: sensor bytes plus its metadata.
pub struct RawFrame {
    /// Little-endian 16-bit samples, `width * height` of them.
    pub data: Vec<u8>,
    pub metadata: CameraFrameMetadata,
}

/// Decoder for an MCRAW container.
pub trait McrawSource: Send {
    /// All frame timestamps, not necessarily sorted.
    fn frame_timestamps(&self) -> Vec<Timestamp>;

    /// Container-level camera description.
    fn container_metadata(&self) -> Result<CameraConfiguration, SourceError>;

    /// Frame metadata only, without pixel data. Used for the exposure scan.
    fn load_frame_metadata(&mut self, timestamp: Timestamp)
        -> Result<CameraFrameMetadata, SourceError>;

    /// Full frame: raw sensor bytes and metadata.
    fn load_frame(&mut self, timestamp: Timestamp) -> Result<RawFrame, SourceError>;

    /// All recorded audio. Empty when the recording has no sound.
    fn load_audio(&mut self) -> Result<Vec<AudioChunk>, SourceError>;

    fn audio_sample_rate(&self) -> u32;

    fn audio_channels(&self) -> u16;
}

/// Stream-level description of a DirectLog video.
#[derive(Debug, Clone)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub total_frames: usize,
    /// Decoder pixel format label, e.g. "yuv420p10le".
    pub pixel_format: String,
    /// True when the file carries the HLG transfer marker; the decoder has
    /// already applied the inverse OECF when this is set.
    pub is_hlg: bool,
}

/// Decoder for a DirectLog MOV/MP4 video.
///
/// The decoder owns the codec and the YUV→linear conversion; frames arrive
/// here as interleaved 16-bit RGB.
pub trait DirectLogSource: Send {
    fn video_info(&self) -> VideoInfo;

    fn frame_timestamps(&self) -> Vec<Timestamp>;

    /// Decode frame `index` to `width * height * 3` linear 16-bit samples.
    fn extract_frame(&mut self, index: usize) -> Result<Vec<u16>, SourceError>;
}

/// One file of a DNG sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceFrame {
    pub timestamp: Timestamp,
    /// Exact byte size of the source file; passthrough entries declare it.
    pub size: u64,
}

/// Reader for a pre-existing DNG sequence, ordered by frame number.
pub trait DngSequenceSource: Send {
    fn frames(&self) -> Vec<SequenceFrame>;

    /// The exact bytes of file `index`.
    fn extract_frame(&mut self, index: usize) -> Result<Vec<u8>, SourceError>;
}

/// Factory for MCRAW decoders.
pub trait OpenMcraw: Send + Sync {
    fn open(&self) -> Result<Box<dyn McrawSource>, SourceError>;
}

impl<F> OpenMcraw for F
where
    F: Fn() -> Result<Box<dyn McrawSource>, SourceError> + Send + Sync,
{
    fn open(&self) -> Result<Box<dyn McrawSource>, SourceError> {
        self()
    }
}

/// Factory for DirectLog decoders.
pub trait OpenDirectLog: Send + Sync {
    fn open(&self) -> Result<Box<dyn DirectLogSource>, SourceError>;
}

impl<F> OpenDirectLog for F
where
    F: Fn() -> Result<Box<dyn DirectLogSource>, SourceError> + Send + Sync,
{
    fn open(&self) -> Result<Box<dyn DirectLogSource>, SourceError> {
        self()
    }
}

/// Factory for DNG sequence readers.
pub trait OpenDngSequence: Send + Sync {
    fn open(&self) -> Result<Box<dyn DngSequenceSource>, SourceError>;
}

impl<F> OpenDngSequence for F
where
    F: Fn() -> Result<Box<dyn DngSequenceSource>, SourceError> + Send + Sync,
{
    fn open(&self) -> Result<Box<dyn DngSequenceSource>, SourceError> {
        self()
    }
}

/// Recognize the HLG marker DirectLog recorders put in filenames.
pub fn is_hlg_filename(path: &str) -> bool {
    path.to_ascii_lowercase().contains("hlg_native")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hlg_filename_detection() {
        assert!(is_hlg_filename("clip_HLG_NATIVE.mov"));
        assert!(is_hlg_filename("CLIP_hlg_native_01.mp4"));
        assert!(!is_hlg_filename("clip_rec709.mov"));
    }
}
