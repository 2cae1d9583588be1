//! Per-source virtual filesystems.
//!
//! Each mounted source is presented as one flat read-only directory of
//! per-frame DNG files plus, for MCRAW recordings with sound, an
//! `audio.wav`. The three source kinds share entry construction, timing,
//! and the cache/pool plumbing; only decoding and per-frame assembly differ:
//!
//! - [`McrawFileSystem`] - Bayer synthesis from MCRAW containers
//! - [`DirectLogFileSystem`] - RGB synthesis (optionally remosaiced)
//! - [`DngSequenceFileSystem`] - passthrough of existing DNG files

pub mod entries;
mod dng_sequence;
mod directlog;
mod mcraw;

pub use directlog::DirectLogFileSystem;
pub use dng_sequence::DngSequenceFileSystem;
pub use mcraw::McrawFileSystem;

use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;

use thiserror::Error;

use crate::pipeline::PoolError;
use crate::render::{RenderConfig, RenderError};
use crate::source::{SourceError, Timestamp};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
}

/// One virtual file.
///
/// Identity (equality, hashing) is the `(kind, path_parts, name)` triple;
/// `size`, `user_data` and `frame_index` are payload.
#[derive(Debug, Clone)]
pub struct Entry {
    pub kind: EntryKind,
    pub path_parts: Vec<String>,
    pub name: String,
    /// Declared size; must match the rendered artifact byte-exactly.
    pub size: u64,
    /// Source timestamp backing this entry (0 for non-frame entries).
    pub user_data: Timestamp,
    /// Output sequence index (0 for non-frame entries).
    pub frame_index: u32,
}

impl Entry {
    pub fn file(name: impl Into<String>, size: u64) -> Entry {
        Entry {
            kind: EntryKind::File,
            path_parts: Vec::new(),
            name: name.into(),
            size,
            user_data: 0,
            frame_index: 0,
        }
    }

    /// Path of this entry relative to the mount root.
    pub fn full_path(&self) -> String {
        if self.path_parts.is_empty() {
            return self.name.clone();
        }
        let mut path = self.path_parts.join("/");
        path.push('/');
        path.push_str(&self.name);
        path
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.path_parts == other.path_parts && self.name == other.name
    }
}

impl Eq for Entry {}

impl Hash for Entry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.path_parts.hash(state);
        self.name.hash(state);
    }
}

/// Timing and geometry summary of a mounted source.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FileInfo {
    pub fps: f32,
    pub median_fps: f32,
    pub average_fps: f32,
    pub total_frames: u32,
    pub dropped_frames: u32,
    pub duplicated_frames: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Error)]
pub enum VfsError {
    #[error("no such entry: {0}")]
    NotFound(String),

    #[error("source contains no frames")]
    EmptySource,

    #[error("artifact build failed previously")]
    BuildFailed,

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// The surface the projection host drives.
///
/// `read_file` returns the requested window as owned bytes; a read past the
/// declared size yields an empty buffer. All reads of the same entry
/// converge on the same cached artifact.
pub trait VirtualFileSystem: Send + Sync {
    /// All entries, optionally filtered to names containing `filter`.
    fn list_files(&self, filter: &str) -> Vec<Entry>;

    /// Look an entry up by its path relative to the mount root.
    fn find_entry(&self, full_path: &str) -> Option<Entry>;

    /// Read `len` bytes at `pos` of `entry`.
    fn read_file<'a>(
        &'a self,
        entry: &'a Entry,
        pos: u64,
        len: usize,
    ) -> BoxFuture<'a, Result<Vec<u8>, VfsError>>;

    /// Swap the render config: clears cached artifacts and rebuilds the
    /// entry list before returning. Never fails; an unrecoverable re-init
    /// leaves an empty entry list behind.
    fn update_options(&self, config: RenderConfig) -> BoxFuture<'_, ()>;

    fn file_info(&self) -> FileInfo;
}

/// Copy the window `[pos, pos + len)` out of an artifact.
pub(crate) fn read_window(artifact: &[u8], pos: u64, len: usize) -> Vec<u8> {
    let Ok(pos) = usize::try_from(pos) else {
        return Vec::new();
    };
    if pos >= artifact.len() {
        return Vec::new();
    }
    let end = pos.saturating_add(len).min(artifact.len());
    artifact[pos..end].to_vec()
}
