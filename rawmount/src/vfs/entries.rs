//! Shared entry-list construction.
//!
//! All source kinds produce the same shape of listing: an optional desktop
//! integration sidecar, an optional `audio.wav`, and one `.dng` entry per
//! output frame named `{base}-{index:06}.dng`. The list is indexed by full
//! path for O(1) lookup from the projection host.

use std::collections::HashMap;

use crate::source::Timestamp;
use crate::timing::OutputMap;
use crate::vfs::Entry;

/// Folder-customization sidecar served on hosts that render thumbnails.
/// The blob disables file-operation confirmations and thumbnail extraction
/// for the virtual folder.
pub const DESKTOP_INI: &str = "[.ShellClassInfo]\r\n\
ConfirmFileOp=0\r\n\
\r\n\
[ViewState]\r\n\
Mode=4\r\n\
Vid={137E7700-3573-11CF-AE69-08002B2E1262}\r\n\
FolderType=Generic\r\n\
\r\n\
[{5984FFE0-28D4-11CF-AE66-08002B2E1262}]\r\n\
Mode=4\r\n\
LogicalViewMode=1\r\n\
IconSize=16\r\n\
\r\n\
[LocalizedFileNames]\r\n";

pub const DESKTOP_INI_NAME: &str = "desktop.ini";
pub const AUDIO_WAV_NAME: &str = "audio.wav";

/// Name of the DNG entry for output frame `index`.
pub fn frame_file_name(base_name: &str, index: u32) -> String {
    format!("{}-{:06}.dng", base_name, index)
}

/// An entry list with a path index.
#[derive(Debug, Default, Clone)]
pub struct EntryList {
    entries: Vec<Entry>,
    by_path: HashMap<String, usize>,
}

impl EntryList {
    pub fn new(entries: Vec<Entry>) -> Self {
        let by_path = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.full_path(), i))
            .collect();
        Self { entries, by_path }
    }

    pub fn all(&self) -> &[Entry] {
        &self.entries
    }

    pub fn find(&self, full_path: &str) -> Option<&Entry> {
        self.by_path.get(full_path).map(|&i| &self.entries[i])
    }

    pub fn filtered(&self, filter: &str) -> Vec<Entry> {
        if filter.is_empty() {
            return self.entries.clone();
        }
        self.entries
            .iter()
            .filter(|e| e.name.contains(filter))
            .cloned()
            .collect()
    }

}

/// Assemble the standard listing for a source.
///
/// `size_for` supplies the declared size per output frame (a constant for
/// synthesized DNGs, the source file size for passthrough).
pub fn build_entries(
    base_name: &str,
    output_map: &OutputMap,
    audio_wav_size: Option<u64>,
    size_for: impl Fn(Timestamp) -> u64,
) -> EntryList {
    let mut entries = Vec::with_capacity(output_map.frames.len() + 2);

    if cfg!(windows) {
        entries.push(Entry::file(DESKTOP_INI_NAME, DESKTOP_INI.len() as u64));
    }

    if let Some(size) = audio_wav_size {
        entries.push(Entry::file(AUDIO_WAV_NAME, size));
    }

    for frame in &output_map.frames {
        let mut entry = Entry::file(
            frame_file_name(base_name, frame.index),
            size_for(frame.source_timestamp),
        );
        entry.user_data = frame.source_timestamp;
        entry.frame_index = frame.index;
        entries.push(entry);
    }

    EntryList::new(entries)
}

/// Stem of a source path, used as the frame-name base.
pub fn base_name_of(source_path: &str) -> String {
    std::path::Path::new(source_path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "frame".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::OutputFrame;

    fn output_map(count: u32) -> OutputMap {
        OutputMap {
            frames: (0..count)
                .map(|i| OutputFrame {
                    index: i,
                    source_timestamp: i as i64 * 1000,
                })
                .collect(),
            duplicated: 0,
            dropped: 0,
        }
    }

    #[test]
    fn test_frame_file_name_padding() {
        assert_eq!(frame_file_name("clip", 0), "clip-000000.dng");
        assert_eq!(frame_file_name("clip", 299), "clip-000299.dng");
        assert_eq!(frame_file_name("clip", 1_000_000), "clip-1000000.dng");
    }

    #[test]
    fn test_build_entries_with_audio() {
        let list = build_entries("clip", &output_map(3), Some(1234), |_| 5000);

        let names: Vec<&str> = list.all().iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"audio.wav"));
        assert!(names.contains(&"clip-000002.dng"));

        let audio = list.find("audio.wav").unwrap();
        assert_eq!(audio.size, 1234);

        let frame = list.find("clip-000001.dng").unwrap();
        assert_eq!(frame.size, 5000);
        assert_eq!(frame.user_data, 1000);
        assert_eq!(frame.frame_index, 1);
    }

    #[test]
    fn test_filtered() {
        let list = build_entries("clip", &output_map(3), Some(10), |_| 1);
        assert_eq!(list.filtered("").len(), list.all().len());
        assert_eq!(list.filtered("wav").len(), 1);
        assert_eq!(list.filtered("000001").len(), 1);
        assert_eq!(list.filtered("nope").len(), 0);
    }

    #[test]
    fn test_base_name_of() {
        assert_eq!(base_name_of("/clips/take1.mcraw"), "take1");
        assert_eq!(base_name_of("video.mov"), "video");
    }
}
