//! DNG sequence virtual filesystem.
//!
//! Pre-existing DNG files pass through byte-identically; this variant only
//! renames them onto the output cadence and serves them through the shared
//! cache. When vignette correction is requested, the embedded gain-map
//! opcode is recognized (pixel application stays off so passthrough remains
//! exact).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::cache::{ArtifactCache, CacheKey, CachedArtifact};
use crate::dng::{parse_opcode_list, tags, Ifd};
use crate::pipeline::Pools;
use crate::render::{RenderConfig, RenderOptions};
use crate::source::{DngSequenceSource, OpenDngSequence, Timestamp};
use crate::timing::FrameTimeline;
use crate::vfs::entries::{self, EntryList, DESKTOP_INI, DESKTOP_INI_NAME};
use crate::vfs::{read_window, BoxFuture, Entry, FileInfo, VfsError, VirtualFileSystem};

struct State {
    config: RenderConfig,
    entries: EntryList,
    timeline: FrameTimeline,
    info: FileInfo,
}

impl State {
    fn empty(config: RenderConfig) -> State {
        State {
            config,
            entries: EntryList::default(),
            timeline: FrameTimeline::new(Vec::new(), "", false),
            info: FileInfo::default(),
        }
    }
}

pub struct DngSequenceFileSystem {
    pools: Arc<Pools>,
    cache: Arc<ArtifactCache>,
    opener: Arc<dyn OpenDngSequence>,
    source_path: String,
    base_name: String,
    /// Sorted source timestamps.
    timestamps: Vec<Timestamp>,
    /// Source file size and decoder index per timestamp.
    size_by_ts: HashMap<Timestamp, u64>,
    index_by_ts: HashMap<Timestamp, usize>,
    /// Dimensions probed from the first file's IFD.
    width: u32,
    height: u32,
    decoder_slots: Arc<Mutex<Vec<Box<dyn DngSequenceSource>>>>,
    state: RwLock<State>,
}

impl DngSequenceFileSystem {
    pub async fn new(
        pools: Arc<Pools>,
        cache: Arc<ArtifactCache>,
        opener: Arc<dyn OpenDngSequence>,
        source_path: impl Into<String>,
        config: RenderConfig,
    ) -> Result<Arc<Self>, VfsError> {
        let source_path = source_path.into();
        let base_name = entries::base_name_of(&source_path);

        let scan_opener = Arc::clone(&opener);
        let (decoder, frames, probe) = pools
            .io
            .run(move || -> Result<_, VfsError> {
                let mut decoder = scan_opener.open()?;
                let frames = decoder.frames();
                if frames.is_empty() {
                    return Err(VfsError::EmptySource);
                }
                let probe = decoder.extract_frame(0)?;
                Ok((decoder, frames, probe))
            })
            .await??;

        // Dimensions come from the first file's IFD; a malformed file is
        // tolerated (zero dims) since passthrough never re-renders.
        let (width, height) = match Ifd::parse(&probe) {
            Ok(ifd) => (
                ifd.u32_values(tags::TAG_IMAGE_WIDTH)
                    .and_then(|v| v.first().copied())
                    .unwrap_or(0),
                ifd.u32_values(tags::TAG_IMAGE_LENGTH)
                    .and_then(|v| v.first().copied())
                    .unwrap_or(0),
            ),
            Err(e) => {
                warn!(source = %source_path, error = %e, "Could not probe sequence dimensions");
                (0, 0)
            }
        };

        let size_by_ts = frames.iter().map(|f| (f.timestamp, f.size)).collect();
        let index_by_ts = frames
            .iter()
            .enumerate()
            .map(|(i, f)| (f.timestamp, i))
            .collect();
        let mut timestamps: Vec<Timestamp> = frames.iter().map(|f| f.timestamp).collect();
        timestamps.sort_unstable();

        info!(
            source = %source_path,
            frames = timestamps.len(),
            width,
            height,
            "DNG sequence loaded"
        );

        let fs = Arc::new(Self {
            pools,
            cache,
            opener,
            source_path,
            base_name,
            timestamps,
            size_by_ts,
            index_by_ts,
            width,
            height,
            decoder_slots: Arc::new(Mutex::new(vec![decoder])),
            state: RwLock::new(State::empty(config.clone())),
        });

        *fs.state.write() = fs.rebuild(config);
        Ok(fs)
    }

    fn rebuild(&self, config: RenderConfig) -> State {
        debug!(source = %self.source_path, options = %config.options, "Rebuilding DNG sequence state");

        let timeline = FrameTimeline::new(
            self.timestamps.clone(),
            &config.cfr_target,
            config.options.contains(RenderOptions::FRAMERATE_CONVERSION),
        );
        let output_map = timeline.output_map();

        let entry_list = entries::build_entries(&self.base_name, &output_map, None, |ts| {
            self.size_by_ts.get(&ts).copied().unwrap_or(0)
        });

        let info = FileInfo {
            fps: timeline.target_fps,
            median_fps: timeline.median_fps,
            average_fps: timeline.average_fps,
            total_frames: self.timestamps.len() as u32,
            dropped_frames: output_map.dropped,
            duplicated_frames: output_map.duplicated,
            width: self.width,
            height: self.height,
        };

        State {
            config,
            entries: entry_list,
            timeline,
            info,
        }
    }

    async fn read_dng(&self, entry: &Entry, pos: u64, len: usize) -> Result<Vec<u8>, VfsError> {
        let apply_vignette = {
            let state = self.state.read();
            state
                .config
                .options
                .contains(RenderOptions::APPLY_VIGNETTE_CORRECTION)
        };

        let Some(&index) = self.index_by_ts.get(&entry.user_data) else {
            return Err(VfsError::NotFound(entry.full_path()));
        };

        let key = CacheKey::new(&self.source_path, &entry.name);
        let artifact = self
            .cache
            .get_or_build(key, || async {
                let slot = self.decoder_slots.lock().pop();
                let opener = Arc::clone(&self.opener);
                let slots = Arc::clone(&self.decoder_slots);

                let bytes = self
                    .pools
                    .io
                    .run(move || -> Result<Vec<u8>, VfsError> {
                        let mut decoder = match slot {
                            Some(decoder) => decoder,
                            None => opener.open()?,
                        };
                        let result = decoder.extract_frame(index);
                        slots.lock().push(decoder);
                        Ok(result?)
                    })
                    .await??;

                if apply_vignette {
                    // Recognized but not applied: passthrough stays exact.
                    match Ifd::parse(&bytes)
                        .ok()
                        .and_then(|ifd| ifd.byte_values(tags::TAG_OPCODE_LIST_2))
                    {
                        Some(payload) => {
                            let maps = parse_opcode_list(&payload);
                            debug!(frame = index, gain_maps = maps.len(), "Gain map present");
                        }
                        None => debug!(frame = index, "No gain map opcode in source DNG"),
                    }
                }

                Ok::<Vec<u8>, VfsError>(bytes)
            })
            .await;

        match artifact {
            CachedArtifact::Ready(bytes) => Ok(read_window(&bytes, pos, len)),
            CachedArtifact::Failed => Err(VfsError::BuildFailed),
        }
    }
}

impl VirtualFileSystem for DngSequenceFileSystem {
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
            let state = self.rebuild(config);
            *self.state.write() = state;
        })
    }

    fn file_info(&self) -> FileInfo {
        self.state.read().info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::testing::FakeDngSequence;
    use crate::source::SourceError;

    async fn mount(
        fake: FakeDngSequence,
        config: RenderConfig,
    ) -> Result<Arc<DngSequenceFileSystem>, VfsError> {
        let opener: Arc<dyn OpenDngSequence> = Arc::new(move || {
            Ok::<Box<dyn DngSequenceSource>, SourceError>(Box::new(fake.clone()))
        });
        DngSequenceFileSystem::new(
            Arc::new(Pools::with_workers(2, 2)),
            Arc::new(ArtifactCache::new(16 * 1024 * 1024)),
            opener,
            "/clips/seq/take2.dngs",
            config,
        )
        .await
    }

    #[tokio::test]
    async fn test_passthrough_is_bit_identical() {
        let fake = FakeDngSequence::with_frames(3, 24.0);
        let originals: Vec<Vec<u8>> = fake.frames.iter().map(|(_, b)| b.clone()).collect();

        let fs = mount(fake, RenderConfig::default()).await.unwrap();

        for (i, original) in originals.iter().enumerate() {
            let entry = fs.find_entry(&format!("take2-{:06}.dng", i)).unwrap();
            assert_eq!(entry.size as usize, original.len());

            let bytes = fs.read_file(&entry, 0, usize::MAX).await.unwrap();
            assert_eq!(&bytes, original, "frame {} not bit-identical", i);
        }
    }

    #[tokio::test]
    async fn test_probed_dimensions() {
        let fs = mount(FakeDngSequence::with_frames(2, 24.0), RenderConfig::default())
            .await
            .unwrap();
        let info = fs.file_info();
        assert_eq!((info.width, info.height), (8, 8));
    }

    #[tokio::test]
    async fn test_vignette_option_keeps_passthrough_exact() {
        let fake = FakeDngSequence::with_frames(1, 24.0);
        let original = fake.frames[0].1.clone();

        let config = RenderConfig {
            options: RenderOptions::APPLY_VIGNETTE_CORRECTION,
            ..RenderConfig::default()
        };
        let fs = mount(fake, config).await.unwrap();

        let entry = fs.find_entry("take2-000000.dng").unwrap();
        let bytes = fs.read_file(&entry, 0, usize::MAX).await.unwrap();
        assert_eq!(bytes, original);
    }
}
