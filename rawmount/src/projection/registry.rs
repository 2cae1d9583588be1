//! Mount table and read dispatch.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{is_host_metadata_name, ProjectionError};
use crate::render::RenderConfig;
use crate::vfs::{Entry, FileInfo, VfsError, VirtualFileSystem};

pub type MountId = u32;

/// Completion callback for asynchronous reads: receives the copied window
/// or the error that stopped it. Dropped without being called when the
/// mount is torn down mid-read, so implementations must not rely on being
/// invoked.
pub type ReadCompletion = Box<dyn FnOnce(Result<Vec<u8>, VfsError>) + Send + 'static>;

struct Mount {
    vfs: Arc<dyn VirtualFileSystem>,
    virtual_root: PathBuf,
    cancel: CancellationToken,
}

/// Handle returned by [`MountRegistry::mount`]; identifies the mount to
/// every subsequent host callback.
#[derive(Debug, Clone)]
pub struct MountHandle {
    pub id: MountId,
    pub virtual_root: PathBuf,
}

/// Table of live mounts, shared with the OS binding.
///
/// Enumerate and read callbacks never block one another: reads run as
/// spawned tasks against the shared cache and pools, and the mount table
/// lock is only held for the lookup itself.
pub struct MountRegistry {
    mounts: RwLock<HashMap<MountId, Mount>>,
    next_id: AtomicU32,
    runtime: Handle,
}

impl MountRegistry {
    /// Create a registry bound to the current Tokio runtime.
    pub fn new() -> MountRegistry {
        MountRegistry {
            mounts: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            runtime: Handle::current(),
        }
    }

    /// Register a virtual filesystem under a virtual root path.
    pub fn mount(
        &self,
        vfs: Arc<dyn VirtualFileSystem>,
        virtual_root: impl Into<PathBuf>,
    ) -> MountHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let virtual_root = virtual_root.into();

        info!(mount_id = id, root = %virtual_root.display(), "Mounting virtual filesystem");
        self.mounts.write().insert(
            id,
            Mount {
                vfs,
                virtual_root: virtual_root.clone(),
                cancel: CancellationToken::new(),
            },
        );

        MountHandle { id, virtual_root }
    }

    /// Tear a mount down. In-flight reads are cancelled: their completion
    /// callbacks are dropped unharmed and no bytes are returned.
    pub fn unmount(&self, id: MountId) -> Result<(), ProjectionError> {
        let mount = self
            .mounts
            .write()
            .remove(&id)
            .ok_or(ProjectionError::UnknownMount(id))?;

        mount.cancel.cancel();
        info!(mount_id = id, root = %mount.virtual_root.display(), "Unmounted");
        Ok(())
    }

    pub fn mount_count(&self) -> usize {
        self.mounts.read().len()
    }

    fn with_mount<T>(
        &self,
        id: MountId,
        f: impl FnOnce(&Mount) -> T,
    ) -> Result<T, ProjectionError> {
        let mounts = self.mounts.read();
        mounts
            .get(&id)
            .map(f)
            .ok_or(ProjectionError::UnknownMount(id))
    }

    /// Directory enumeration callback.
    pub fn enumerate(&self, id: MountId, filter: &str) -> Result<Vec<Entry>, ProjectionError> {
        self.with_mount(id, |m| m.vfs.list_files(filter))
    }

    /// Entry lookup callback. Host metadata probes short-circuit to
    /// not-found without touching the filesystem.
    pub fn entry_info(&self, id: MountId, path: &str) -> Result<Entry, ProjectionError> {
        let name = path.rsplit('/').next().unwrap_or(path);
        if is_host_metadata_name(name) {
            return Err(ProjectionError::NotFound(path.to_string()));
        }

        self.with_mount(id, |m| m.vfs.find_entry(path))?
            .ok_or_else(|| ProjectionError::NotFound(path.to_string()))
    }

    pub fn file_info(&self, id: MountId) -> Result<FileInfo, ProjectionError> {
        self.with_mount(id, |m| m.vfs.file_info())
    }

    /// Ranged read, fire-and-forget. The completion callback runs on a
    /// worker task; when the mount is removed first, the callback is
    /// dropped instead.
    pub fn read_async(
        &self,
        id: MountId,
        path: &str,
        pos: u64,
        len: usize,
        on_complete: ReadCompletion,
    ) -> Result<(), ProjectionError> {
        let (vfs, cancel) =
            self.with_mount(id, |m| (Arc::clone(&m.vfs), m.cancel.clone()))?;
        let entry = self.entry_info(id, path)?;

        self.runtime.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(entry = %entry.full_path(), "Read cancelled by unmount");
                }
                result = vfs.read_file(&entry, pos, len) => {
                    on_complete(result);
                }
            }
        });

        Ok(())
    }

    /// Ranged read, awaited in place for hosts that want synchronous
    /// semantics.
    pub async fn read(
        &self,
        id: MountId,
        path: &str,
        pos: u64,
        len: usize,
    ) -> Result<Result<Vec<u8>, VfsError>, ProjectionError> {
        let vfs = self.with_mount(id, |m| Arc::clone(&m.vfs))?;
        let entry = self.entry_info(id, path)?;
        Ok(vfs.read_file(&entry, pos, len).await)
    }

    /// Swap a mount's render config; completes after the cache is cleared
    /// and the entry list rebuilt, so subsequent reads see the new config.
    pub async fn update_options(
        &self,
        id: MountId,
        config: RenderConfig,
    ) -> Result<(), ProjectionError> {
        let vfs = self.with_mount(id, |m| Arc::clone(&m.vfs))?;
        vfs.update_options(config).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ArtifactCache;
    use crate::pipeline::Pools;
    use crate::source::testing::FakeMcraw;
    use crate::source::{McrawSource, OpenMcraw, SourceError};
    use crate::vfs::McrawFileSystem;
    use std::time::Duration;

    async fn mounted_registry() -> (MountRegistry, MountHandle) {
        let fake = FakeMcraw::with_frames(4, 30.0);
        let opener: Arc<dyn OpenMcraw> = Arc::new(move || {
            Ok::<Box<dyn McrawSource>, SourceError>(Box::new(fake.clone()))
        });
        let vfs = McrawFileSystem::new(
            Arc::new(Pools::with_workers(2, 2)),
            Arc::new(ArtifactCache::new(16 * 1024 * 1024)),
            opener,
            "/clips/take1.mcraw",
            RenderConfig::default(),
        )
        .await
        .unwrap();

        let registry = MountRegistry::new();
        let handle = registry.mount(vfs, "/mnt/take1");
        (registry, handle)
    }

    #[tokio::test]
    async fn test_mount_enumerate_unmount() {
        let (registry, handle) = mounted_registry().await;
        assert_eq!(registry.mount_count(), 1);

        let entries = registry.enumerate(handle.id, "").unwrap();
        assert_eq!(entries.iter().filter(|e| e.name.ends_with(".dng")).count(), 4);

        registry.unmount(handle.id).unwrap();
        assert_eq!(registry.mount_count(), 0);
        assert!(matches!(
            registry.enumerate(handle.id, ""),
            Err(ProjectionError::UnknownMount(_))
        ));
    }

    #[tokio::test]
    async fn test_metadata_probe_short_circuits() {
        let (registry, handle) = mounted_registry().await;
        assert!(matches!(
            registry.entry_info(handle.id, ".DS_Store"),
            Err(ProjectionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_read_async_completes() {
        let (registry, handle) = mounted_registry().await;
        let (tx, rx) = tokio::sync::oneshot::channel();

        registry
            .read_async(
                handle.id,
                "take1-000000.dng",
                0,
                64,
                Box::new(move |result| {
                    let _ = tx.send(result.map(|b| b.len()));
                }),
            )
            .unwrap();

        let read = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read.unwrap(), 64);
    }

    #[tokio::test]
    async fn test_sync_read_matches_entry_size() {
        let (registry, handle) = mounted_registry().await;
        let entry = registry.entry_info(handle.id, "take1-000001.dng").unwrap();

        let bytes = registry
            .read(handle.id, "take1-000001.dng", 0, usize::MAX)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bytes.len() as u64, entry.size);
    }

    #[tokio::test]
    async fn test_update_options_through_registry() {
        let (registry, handle) = mounted_registry().await;
        let before = registry.entry_info(handle.id, "take1-000000.dng").unwrap();

        registry
            .update_options(
                handle.id,
                RenderConfig {
                    options: crate::render::RenderOptions::LOG_TRANSFORM,
                    log_transform: "Reduce by 4bit".to_string(),
                    ..RenderConfig::default()
                },
            )
            .await
            .unwrap();

        let after = registry.entry_info(handle.id, "take1-000000.dng").unwrap();
        assert!(after.size < before.size);
    }
}
