//! MCRAW virtual filesystem.
//!
//! Presents one MCRAW recording as per-frame DNGs plus, when the recording
//! carries sound, a synced `audio.wav`. Frames are decoded through a small
//! pool of reusable decoder instances on the IO pool and synthesized on the
//! processing pool; artifacts land in the shared cache.

use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::audio::{interleave, render_wav, sync_audio};
use crate::cache::{ArtifactCache, CacheKey, CachedArtifact};
use crate::pipeline::Pools;
use crate::render::{
    synthesize_bayer_dng, ExposureKeyframes, RenderConfig, RenderError, RenderOptions,
    SynthesisContext,
};
use crate::source::{
    AudioChunk, CalibrationData, CameraConfiguration, CfaPhase, McrawSource, OpenMcraw, RawFrame,
    Timestamp,
};
use crate::timing::{to_fraction, FrameTimeline};
use crate::vfs::entries::{self, EntryList, AUDIO_WAV_NAME, DESKTOP_INI, DESKTOP_INI_NAME};
use crate::vfs::{read_window, BoxFuture, Entry, FileInfo, VfsError, VirtualFileSystem};

/// Config-dependent state, rebuilt on every `update_options`.
struct State {
    config: RenderConfig,
    entries: EntryList,
    timeline: FrameTimeline,
    audio_wav: Arc<Vec<u8>>,
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
            audio_wav: Arc::new(Vec::new()),
            keyframes: None,
            calibration: None,
            info: FileInfo::default(),
            total_output_frames: 0,
        }
    }
}

pub struct McrawFileSystem {
    pools: Arc<Pools>,
    cache: Arc<ArtifactCache>,
    opener: Arc<dyn OpenMcraw>,
    source_path: String,
    base_name: String,
    camera: CameraConfiguration,
    /// Smallest `iso * exposure_ns` over all frames; the exposure floor.
    baseline_exposure_floor: f64,
    /// Sorted source frame timestamps; constant across configs.
    timestamps: Vec<Timestamp>,
    /// Raw (un-synced) audio as recorded.
    audio_chunks: Vec<AudioChunk>,
    audio_sample_rate: u32,
    audio_channels: u16,
    /// Opened decoder instances, checked out per IO job.
    decoder_slots: Arc<Mutex<Vec<Box<dyn McrawSource>>>>,
    state: RwLock<State>,
}

impl McrawFileSystem {
    /// Open a source and build the initial entry list.
    ///
    /// Fails when the container has no frames, reports an unsupported
    /// sensor arrangement, or the sample frame cannot be rendered.
    pub async fn new(
        pools: Arc<Pools>,
        cache: Arc<ArtifactCache>,
        opener: Arc<dyn OpenMcraw>,
        source_path: impl Into<String>,
        config: RenderConfig,
    ) -> Result<Arc<Self>, VfsError> {
        let source_path = source_path.into();
        let base_name = entries::base_name_of(&source_path);

        // Scan pass: timestamps, container metadata, exposure floor, audio.
        let scan_opener = Arc::clone(&opener);
        let scan = pools
            .io
            .run(move || -> Result<_, VfsError> {
                let mut decoder = scan_opener.open()?;

                let mut timestamps = decoder.frame_timestamps();
                timestamps.sort_unstable();
                if timestamps.is_empty() {
                    return Err(VfsError::EmptySource);
                }

                let camera = decoder.container_metadata()?;

                let mut floor = f64::MAX;
                for &ts in &timestamps {
                    let metadata = decoder.load_frame_metadata(ts)?;
                    floor = floor.min(metadata.iso as f64 * metadata.exposure_time_ns as f64);
                }

                let audio = decoder.load_audio()?;
                let sample_rate = decoder.audio_sample_rate();
                let channels = decoder.audio_channels();

                Ok((decoder, timestamps, camera, floor, audio, sample_rate, channels))
            })
            .await??;
        let (decoder, timestamps, camera, floor, audio_chunks, audio_sample_rate, audio_channels) =
            scan;

        // An arrangement the synthesis stage cannot express rejects the
        // mount outright.
        if CfaPhase::parse(&camera.sensor_arrangement).is_none() {
            return Err(VfsError::Render(RenderError::UnsupportedSensorArrangement(
                camera.sensor_arrangement.clone(),
            )));
        }

        let fs = Arc::new(Self {
            pools,
            cache,
            opener,
            source_path,
            base_name,
            camera,
            baseline_exposure_floor: floor,
            timestamps,
            audio_chunks,
            audio_sample_rate,
            audio_channels,
            decoder_slots: Arc::new(Mutex::new(vec![decoder])),
            state: RwLock::new(State::empty(config.clone())),
        });

        let state = fs.rebuild(config).await?;
        info!(
            source = %fs.source_path,
            frames = state.total_output_frames,
            fps = state.info.fps,
            "Mounted MCRAW source"
        );
        *fs.state.write() = state;

        Ok(fs)
    }

    /// Build a fresh state for `config`: timing, sample-frame size, audio,
    /// entry list.
    async fn rebuild(&self, config: RenderConfig) -> Result<State, VfsError> {
        debug!(source = %self.source_path, options = %config.options, "Rebuilding MCRAW state");

        let calibration = CalibrationData::load_for_source(Path::new(&self.source_path));
        let keyframes = ExposureKeyframes::parse(&config.exposure_compensation);

        let timeline = FrameTimeline::new(
            self.timestamps.clone(),
            &config.cfr_target,
            config.options.contains(RenderOptions::FRAMERATE_CONVERSION),
        );
        let output_map = timeline.output_map();
        let total_output_frames = output_map.frames.len();

        // One sample frame sizes every DNG entry of the source: all frames
        // share dimensions and encoding parameters.
        let sample = self.load_frame(self.timestamps[0]).await?;
        let synth_camera = self.camera.clone();
        let synth_config = config.clone();
        let synth_calibration = calibration.clone();
        let synth_keyframes = keyframes.clone();
        let fps = timeline.target_fps;
        let floor = self.baseline_exposure_floor;

        let (width, height) = (sample.metadata.width, sample.metadata.height);
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
                    baseline_exposure_floor: floor,
                    exposure_keyframes: synth_keyframes.as_ref(),
                };
                synthesize_bayer_dng(&sample.data, &sample.metadata, 0, &ctx)
            })
            .await??;
        let typical_dng_size = sample_dng.len() as u64;

        // Audio: sync to the first video frame, render once.
        let audio_wav = if self.audio_chunks.is_empty() {
            Arc::new(Vec::new())
        } else {
            let mut chunks = self.audio_chunks.clone();
            sync_audio(
                self.timestamps[0],
                &mut chunks,
                self.audio_sample_rate,
                self.audio_channels,
            );
            let samples = interleave(&chunks);
            let (num, den) = to_fraction(fps, 1000);
            Arc::new(render_wav(
                &samples,
                self.audio_channels,
                self.audio_sample_rate,
                num,
                den,
            ))
        };

        let audio_size = (!audio_wav.is_empty()).then(|| audio_wav.len() as u64);
        let entry_list =
            entries::build_entries(&self.base_name, &output_map, audio_size, |_| typical_dng_size);

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
            audio_wav,
            keyframes,
            calibration,
            info,
            total_output_frames,
        })
    }

    /// Load one frame on the IO pool, reusing an opened decoder when one is
    /// available.
    async fn load_frame(&self, timestamp: Timestamp) -> Result<RawFrame, VfsError> {
        let slot = self.decoder_slots.lock().pop();
        let opener = Arc::clone(&self.opener);
        let slots = Arc::clone(&self.decoder_slots);

        self.pools
            .io
            .run(move || -> Result<RawFrame, VfsError> {
                let mut decoder = match slot {
                    Some(decoder) => decoder,
                    None => opener.open()?,
                };
                let result = decoder.load_frame(timestamp);
                slots.lock().push(decoder);
                Ok(result?)
            })
            .await?
    }

    async fn read_dng(&self, entry: &Entry, pos: u64, len: usize) -> Result<Vec<u8>, VfsError> {
        let (config, fps, total, floor, keyframes, calibration) = {
            let state = self.state.read();
            (
                state.config.clone(),
                state.timeline.target_fps,
                state.total_output_frames,
                self.baseline_exposure_floor,
                state.keyframes.clone(),
                state.calibration.clone(),
            )
        };

        let timestamp = entry.user_data;
        let index = entry.frame_index as usize;
        let key = CacheKey::new(&self.source_path, &entry.name);

        let artifact = self
            .cache
            .get_or_build(key, || async {
                debug!(timestamp, index, options = %config.options, "Rendering frame");

                let frame = self.load_frame(timestamp).await?;
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
                            baseline_exposure_floor: floor,
                            exposure_keyframes: keyframes.as_ref(),
                        };
                        synthesize_bayer_dng(&frame.data, &frame.metadata, index, &ctx)
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

impl VirtualFileSystem for McrawFileSystem {
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
            if entry.name == AUDIO_WAV_NAME {
                let audio = Arc::clone(&self.state.read().audio_wav);
                return Ok(read_window(&audio, pos, len));
            }
            if entry.name.ends_with(".dng") {
                return self.read_dng(entry, pos, len).await;
            }
            Err(VfsError::NotFound(entry.full_path()))
        })
    }

    fn update_options(&self, config: RenderConfig) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            // Stale artifacts must not outlive their encoding parameters.
            self.cache.clear();

            match self.rebuild(config.clone()).await {
                Ok(state) => *self.state.write() = state,
                Err(e) => {
                    error!(source = %self.source_path, error = %e, "Re-init failed, presenting empty listing");
                    let mut state = self.state.write();
                    *state = State::empty(config);
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
    use crate::source::testing::FakeMcraw;
    use crate::source::SourceError;

    fn pools() -> Arc<Pools> {
        Arc::new(Pools::with_workers(2, 2))
    }

    fn cache() -> Arc<ArtifactCache> {
        Arc::new(ArtifactCache::new(64 * 1024 * 1024))
    }

    async fn mount(fake: FakeMcraw, config: RenderConfig) -> Result<Arc<McrawFileSystem>, VfsError> {
        let opener: Arc<dyn OpenMcraw> = Arc::new(move || {
            Ok::<Box<dyn McrawSource>, SourceError>(Box::new(fake.clone()))
        });
        McrawFileSystem::new(pools(), cache(), opener, "/clips/take1.mcraw", config).await
    }

    #[tokio::test]
    async fn test_entry_sizes_match_artifacts() {
        let fs = mount(FakeMcraw::with_frames(5, 30.0), RenderConfig::default())
            .await
            .unwrap();

        for entry in fs.list_files("") {
            if !entry.name.ends_with(".dng") {
                continue;
            }
            let bytes = fs.read_file(&entry, 0, usize::MAX).await.unwrap();
            assert_eq!(bytes.len() as u64, entry.size, "entry {}", entry.name);

            // Reads past the declared size return nothing.
            let past = fs.read_file(&entry, entry.size, 16).await.unwrap();
            assert!(past.is_empty());
        }
    }

    #[tokio::test]
    async fn test_repeated_reads_are_identical() {
        let fs = mount(FakeMcraw::with_frames(3, 24.0), RenderConfig::default())
            .await
            .unwrap();
        let entry = fs.find_entry("take1-000001.dng").unwrap();

        let a = fs.read_file(&entry, 100, 500).await.unwrap();
        let b = fs.read_file(&entry, 100, 500).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_empty_source_is_rejected() {
        let result = mount(FakeMcraw::with_frames(0, 30.0), RenderConfig::default()).await;
        assert!(matches!(result, Err(VfsError::EmptySource)));
    }

    #[tokio::test]
    async fn test_bad_arrangement_rejects_mount() {
        let mut fake = FakeMcraw::with_frames(2, 30.0);
        fake.camera.sensor_arrangement = "foveon".to_string();
        let result = mount(fake, RenderConfig::default()).await;
        assert!(matches!(result, Err(VfsError::Render(_))));
    }

    #[tokio::test]
    async fn test_audio_entry_present_and_served() {
        let fs = mount(
            FakeMcraw::with_frames(4, 30.0).with_audio(4800),
            RenderConfig::default(),
        )
        .await
        .unwrap();

        let entry = fs.find_entry("audio.wav").unwrap();
        let bytes = fs.read_file(&entry, 0, usize::MAX).await.unwrap();
        assert_eq!(bytes.len() as u64, entry.size);
        assert_eq!(&bytes[0..4], b"RIFF");
    }

    #[tokio::test]
    async fn test_update_options_changes_artifacts() {
        let fs = mount(FakeMcraw::with_frames(3, 30.0), RenderConfig::default())
            .await
            .unwrap();

        let before = fs.find_entry("take1-000000.dng").unwrap();
        let plain = fs.read_file(&before, 0, usize::MAX).await.unwrap();

        let config = RenderConfig {
            options: crate::render::RenderOptions::LOG_TRANSFORM,
            log_transform: "Reduce by 4bit".to_string(),
            ..RenderConfig::default()
        };
        fs.update_options(config).await;

        let after = fs.find_entry("take1-000000.dng").unwrap();
        let logged = fs.read_file(&after, 0, usize::MAX).await.unwrap();

        assert_ne!(plain, logged);
        assert_eq!(logged.len() as u64, after.size);
        assert!(after.size < before.size); // 6-bit packing shrinks the strip
    }

    #[tokio::test]
    async fn test_decode_failure_is_negative_cached() {
        let fake = FakeMcraw::with_frames(3, 30.0).failing_after_scan();
        let fs = mount(fake, RenderConfig::default()).await.unwrap();

        let entry = fs.find_entry("take1-000002.dng").unwrap();
        let first = fs.read_file(&entry, 0, 100).await;
        assert!(first.is_err());

        // Second read fails from the negative entry without re-decoding.
        let second = fs.read_file(&entry, 0, 100).await;
        assert!(matches!(second, Err(VfsError::BuildFailed)));
    }
}
