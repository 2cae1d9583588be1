//! DirectLog virtual filesystem.
//!
//! Presents a DirectLog MOV/MP4 as per-frame DNGs. The decoder hands over
//! linear 16-bit RGB (HLG already inverted); synthesis optionally log
//! encodes and remosaics before packing.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::cache::{ArtifactCache, CacheKey, CachedArtifact};
use crate::pipeline::Pools;
use crate::render::{
    synthesize_rgb_dng, ExposureKeyframes, RenderConfig, RenderOptions, SynthesisContext,
};
use crate::source::{
    CalibrationData, CameraConfiguration, DirectLogSource, OpenDirectLog, Timestamp, VideoInfo,
};
use crate::timing::FrameTimeline;
use crate::vfs::entries::{self, EntryList, DESKTOP_INI, DESKTOP_INI_NAME};
use crate::vfs::{read_window, BoxFuture, Entry, FileInfo, VfsError, VirtualFileSystem};

struct State {
    config: RenderConfig,
    entries: EntryList,
    timeline: FrameTimeline,
    keyframes: Option<ExposureKeyframes>,
    calibration: Option<CalibrationData>,
    info: FileInfo,
    total_output_frames: usize,
}

impl State {
    fn empty(config: RenderConfig) -> State {
        State {
            config,
            entries: EntryList::default(),
            timeline: FrameTimeline::new(Vec::new(), "", false),
            keyframes: None,
            calibration: None,
            info: FileInfo::default(),
            total_output_frames: 0,
        }
    }
}

pub struct DirectLogFileSystem {
    pools: Arc<Pools>,
    cache: Arc<ArtifactCache>,
    opener: Arc<dyn OpenDirectLog>,
    source_path: String,
    base_name: String,
    video_info: VideoInfo,
    /// Sorted source timestamps.
    timestamps: Vec<Timestamp>,
    /// Decoder frame index per timestamp (decoder order, not sort order).
    index_by_ts: HashMap<Timestamp, usize>,
    /// Matrices never come from the container on this path; an all-zero
    /// configuration keeps those tags out unless calibration provides them.
    camera: CameraConfiguration,
    decoder_slots: Arc<Mutex<Vec<Box<dyn DirectLogSource>>>>,
    state: RwLock<State>,
}

impl DirectLogFileSystem {
    pub async fn new(
        pools: Arc<Pools>,
        cache: Arc<ArtifactCache>,
        opener: Arc<dyn OpenDirectLog>,
        source_path: impl Into<String>,
        config: RenderConfig,
    ) -> Result<Arc<Self>, VfsError> {
        let source_path = source_path.into();
        let base_name = entries::base_name_of(&source_path);

        let scan_opener = Arc::clone(&opener);
        let (decoder, video_info, raw_timestamps) = pools
            .io
            .run(move || -> Result<_, VfsError> {
                let decoder = scan_opener.open()?;
                let info = decoder.video_info();
                let timestamps = decoder.frame_timestamps();
                if timestamps.is_empty() {
                    return Err(VfsError::EmptySource);
                }
                Ok((decoder, info, timestamps))
            })
            .await??;

        let index_by_ts = raw_timestamps
            .iter()
            .enumerate()
            .map(|(i, &ts)| (ts, i))
            .collect();
        let mut timestamps = raw_timestamps;
        timestamps.sort_unstable();

        info!(
            source = %source_path,
            width = video_info.width,
            height = video_info.height,
            frames = video_info.total_frames,
            pixel_format = %video_info.pixel_format,
            hlg = video_info.is_hlg,
            "DirectLog video loaded"
        );

        let fs = Arc::new(Self {
            pools,
            cache,
            opener,
            source_path,
            base_name,
            video_info,
            timestamps,
            index_by_ts,
            camera: CameraConfiguration {
                color_matrix1: [0.0; 9],
                ..CameraConfiguration::default()
            },
            decoder_slots: Arc::new(Mutex::new(vec![decoder])),
            state: RwLock::new(State::empty(config.clone())),
        });

        let state = fs.rebuild(config).await?;
        *fs.state.write() = state;
        Ok(fs)
    }

    async fn rebuild(&self, config: RenderConfig) -> Result<State, VfsError> {
        debug!(source = %self.source_path, options = %config.options, "Rebuilding DirectLog state");

        let calibration = CalibrationData::load_for_source(Path::new(&self.source_path));
        let keyframes = ExposureKeyframes::parse(&config.exposure_compensation);

        let timeline = FrameTimeline::new(
            self.timestamps.clone(),
            &config.cfr_target,
            config.options.contains(RenderOptions::FRAMERATE_CONVERSION),
        );
        let output_map = timeline.output_map();
        let total_output_frames = output_map.frames.len();

        // Sample conversion sizes every entry.
        let sample_rgb = self.extract_frame(self.timestamps[0]).await?;
        let (width, height) = (self.video_info.width, self.video_info.height);
        let synth_camera = self.camera.clone();
        let synth_config = config.clone();
        let synth_calibration = calibration.clone();
        let synth_keyframes = keyframes.clone();
        let fps = timeline.target_fps;

        let sample_dng = self
            .pools
            .processing
            .run(move || {
                let ctx = SynthesisContext {
                    camera: &synth_camera,
                    calibration: synth_calibration.as_ref(),
                    config: &synth_config,
                    fps,
                    total_output_frames,
                    baseline_exposure_floor: 0.0,
                    exposure_keyframes: synth_keyframes.as_ref(),
                };
                synthesize_rgb_dng(&sample_rgb, width, height, 0, &ctx)
            })
            .await??;
        let typical_dng_size = sample_dng.len() as u64;

        let entry_list =
            entries::build_entries(&self.base_name, &output_map, None, |_| typical_dng_size);

        info!(
            source = %self.source_path,
            entries = entry_list.all().len(),
            fps = timeline.target_fps,
            dropped = output_map.dropped,
            duplicated = output_map.duplicated,
            "DirectLog entries generated"
        );

        let info = FileInfo {
            fps: timeline.target_fps,
            median_fps: timeline.median_fps,
            average_fps: timeline.average_fps,
            total_frames: self.timestamps.len() as u32,
            dropped_frames: output_map.dropped,
            duplicated_frames: output_map.duplicated,
            width,
            height,
        };

        Ok(State {
            config,
            entries: entry_list,
            timeline,
            keyframes,
            calibration,
            info,
            total_output_frames,
        })
    }

    /// Decode one frame's RGB samples on the IO pool.
    async fn extract_frame(&self, timestamp: Timestamp) -> Result<Vec<u16>, VfsError> {
        let Some(&index) = self.index_by_ts.get(&timestamp) else {
            return Err(VfsError::NotFound(format!("frame at {}", timestamp)));
        };

        let slot = self.decoder_slots.lock().pop();
        let opener = Arc::clone(&self.opener);
        let slots = Arc::clone(&self.decoder_slots);

        self.pools
            .io
            .run(move || -> Result<Vec<u16>, VfsError> {
                let mut decoder = match slot {
                    Some(decoder) => decoder,
                    None => opener.open()?,
                };
                let result = decoder.extract_frame(index);
                slots.lock().push(decoder);
                Ok(result?)
            })
            .await?
    }

    async fn read_dng(&self, entry: &Entry, pos: u64, len: usize) -> Result<Vec<u8>, VfsError> {
        let (config, fps, total, keyframes, calibration) = {
            let state = self.state.read();
            (
                state.config.clone(),
                state.timeline.target_fps,
                state.total_output_frames,
                state.keyframes.clone(),
                state.calibration.clone(),
            )
        };

        let timestamp = entry.user_data;
        let index = entry.frame_index as usize;
        let (width, height) = (self.video_info.width, self.video_info.height);
        let key = CacheKey::new(&self.source_path, &entry.name);

        let artifact = self
            .cache
            .get_or_build(key, || async {
                let rgb = self.extract_frame(timestamp).await?;
                let camera = self.camera.clone();

                let bytes = self
                    .pools
                    .processing
                    .run(move || {
                        let ctx = SynthesisContext {
                            camera: &camera,
                            calibration: calibration.as_ref(),
                            config: &config,
                            fps,
                            total_output_frames: total,
                            baseline_exposure_floor: 0.0,
                            exposure_keyframes: keyframes.as_ref(),
                        };
                        synthesize_rgb_dng(&rgb, width, height, index, &ctx)
                    })
                    .await??;

                Ok::<Vec<u8>, VfsError>(bytes)
            })
            .await;

        match artifact {
            CachedArtifact::Ready(bytes) => Ok(read_window(&bytes, pos, len)),
            CachedArtifact::Failed => Err(VfsError::BuildFailed),
        }
    }
}

impl VirtualFileSystem for DirectLogFileSystem {
    fn list_files(&self, filter: &str) -> Vec<Entry> {
        self.state.read().entries.filtered(filter)
    }

    fn find_entry(&self, full_path: &str) -> Option<Entry> {
        self.state.read().entries.find(full_path).cloned()
    }

    fn read_file<'a>(
        &'a self,
        entry: &'a Entry,
        pos: u64,
        len: usize,
    ) -> BoxFuture<'a, Result<Vec<u8>, VfsError>> {
        Box::pin(async move {
            if entry.name == DESKTOP_INI_NAME {
                return Ok(read_window(DESKTOP_INI.as_bytes(), pos, len));
            }
            if entry.name.ends_with(".dng") {
                return self.read_dng(entry, pos, len).await;
            }
            Err(VfsError::NotFound(entry.full_path()))
        })
    }

    fn update_options(&self, config: RenderConfig) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.cache.clear();
            match self.rebuild(config.clone()).await {
                Ok(state) => *self.state.write() = state,
                Err(e) => {
                    error!(source = %self.source_path, error = %e, "Re-init failed, presenting empty listing");
                    *self.state.write() = State::empty(config);
                }
            }
        })
    }

    fn file_info(&self) -> FileInfo {
        self.state.read().info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dng::tags::*;
    use crate::dng::Ifd;
    use crate::source::testing::FakeDirectLog;
    use crate::source::{DirectLogSource, SourceError};

    async fn mount(
        fake: FakeDirectLog,
        config: RenderConfig,
    ) -> Result<Arc<DirectLogFileSystem>, VfsError> {
        let opener: Arc<dyn OpenDirectLog> = Arc::new(move || {
            Ok::<Box<dyn DirectLogSource>, SourceError>(Box::new(fake.clone()))
        });
        DirectLogFileSystem::new(
            Arc::new(Pools::with_workers(2, 2)),
            Arc::new(ArtifactCache::new(64 * 1024 * 1024)),
            opener,
            "/clips/video_HLG_NATIVE.mov",
            config,
        )
        .await
    }

    #[tokio::test]
    async fn test_remosaic_with_log_reduction() {
        let config = RenderConfig {
            options: RenderOptions::LOG_TRANSFORM | RenderOptions::REMOSAIC,
            log_transform: "Reduce by 4bit".to_string(),
            cfa_phase: "rggb".to_string(),
            ..RenderConfig::default()
        };
        let fs = mount(FakeDirectLog::with_frames(3, 24.0, 16, 16), config)
            .await
            .unwrap();

        let entry = fs.find_entry("video_HLG_NATIVE-000000.dng").unwrap();
        let bytes = fs.read_file(&entry, 0, usize::MAX).await.unwrap();
        assert_eq!(bytes.len() as u64, entry.size);

        let ifd = Ifd::parse(&bytes).unwrap();
        assert_eq!(ifd.u16_values(TAG_SAMPLES_PER_PIXEL).unwrap(), vec![1]);
        assert_eq!(ifd.byte_values(TAG_CFA_PATTERN).unwrap(), vec![0, 1, 1, 2]);
        assert_eq!(ifd.u16_values(TAG_BITS_PER_SAMPLE).unwrap(), vec![8]);
        let table = ifd.u16_values(TAG_LINEARIZATION_TABLE).unwrap();
        assert_eq!(table.len(), 256);
        assert_eq!(table[0], 0);
        assert_eq!(table[255], 65535);
    }

    #[tokio::test]
    async fn test_rgb_entry_size_matches() {
        let fs = mount(
            FakeDirectLog::with_frames(2, 30.0, 16, 16),
            RenderConfig::default(),
        )
        .await
        .unwrap();

        for entry in fs.list_files("") {
            if entry.name.ends_with(".dng") {
                let bytes = fs.read_file(&entry, 0, usize::MAX).await.unwrap();
                assert_eq!(bytes.len() as u64, entry.size);
            }
        }
    }

    #[tokio::test]
    async fn test_file_info_dimensions() {
        let fs = mount(
            FakeDirectLog::with_frames(2, 30.0, 32, 16),
            RenderConfig::default(),
        )
        .await
        .unwrap();
        let info = fs.file_info();
        assert_eq!((info.width, info.height), (32, 16));
        assert_eq!(info.total_frames, 2);
    }
}
