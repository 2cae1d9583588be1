//! RawMount - raw camera captures as virtual DNG directories.
//!
//! This library presents recorded raw captures (MCRAW containers, DirectLog
//! MOV/MP4 videos, and pre-existing DNG sequences) as virtual directories
//! of per-frame Adobe DNG files plus an optional companion WAV. Editing
//! software browsing a mounted directory reads DNGs on demand; every read
//! triggers lazy per-frame transcoding governed by a [`render::RenderConfig`].
//!
//! # Architecture
//!
//! ```text
//! host callback ──► projection::MountRegistry ──► vfs (entry lookup)
//!                                                   │ cache miss
//!                                                   ▼
//!                       IO pool ──► source decoder ──► processing pool
//!                                                         │
//!                             render (preprocess ► bitpack ► dng writer)
//!                                                         │
//!                                  cache ◄── artifact ────┘
//! ```
//!
//! The source container parsers and the OS virtualization binding live
//! outside this crate; see [`source`] for the decoder contracts and
//! [`projection`] for the host-facing surface.

pub mod audio;
pub mod bitpack;
pub mod cache;
pub mod dng;
pub mod pipeline;
pub mod projection;
pub mod render;
pub mod shading;
pub mod source;
pub mod timing;
pub mod vfs;

pub use cache::ArtifactCache;
pub use pipeline::Pools;
pub use projection::{MountHandle, MountId, MountRegistry};
pub use render::{RenderConfig, RenderOptions};
pub use vfs::{
    DirectLogFileSystem, DngSequenceFileSystem, Entry, FileInfo, McrawFileSystem,
    VirtualFileSystem,
};
