//! Projection host adapter.
//!
//! The OS virtualization layer (ProjFS on one platform, FUSE on the other)
//! lives outside this crate; its binding forwards directory enumeration,
//! entry lookup, and ranged reads here. [`MountRegistry`] owns the mounted
//! virtual filesystems, dispatches those callbacks, and cancels in-flight
//! reads when a mount goes away.

mod registry;

pub use registry::{MountHandle, MountId, MountRegistry, ReadCompletion};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("unknown mount id: {0}")]
    UnknownMount(MountId),

    #[error("no such entry: {0}")]
    NotFound(String),
}

/// Host-metadata names some platforms probe eagerly. Answering these
/// without consulting the filesystem keeps finder-style hosts quiet.
pub fn is_host_metadata_name(name: &str) -> bool {
    name == ".DS_Store"
        || name == ".fseventsd"
        || name == ".Trashes"
        || name == ".hidden"
        || name.starts_with("._")
        || name.starts_with(".Spotlight")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_metadata_names() {
        assert!(is_host_metadata_name(".DS_Store"));
        assert!(is_host_metadata_name("._take1-000000.dng"));
        assert!(is_host_metadata_name(".Spotlight-V100"));
        assert!(!is_host_metadata_name("take1-000000.dng"));
        assert!(!is_host_metadata_name("audio.wav"));
    }
}
