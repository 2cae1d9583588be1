//! Shared artifact cache.
//!
//! One process-wide cache holds rendered artifacts (DNG frames) keyed by
//! source path and entry name. It is backed by `moka::future::Cache`, which
//! uses lock-free structures internally and is safe to hit from many
//! concurrent reads without starving the runtime.
//!
//! Three cache-contract details matter to callers:
//! - `get_or_build` coalesces concurrent builds: while a key is being
//!   rendered, every other caller for that key waits for the same result
//!   instead of rendering again.
//! - A failed build is remembered as a negative entry so repeated reads of
//!   a broken frame do not re-run the decoder; negatives are purged by
//!   `clear()` (config changes, unmount).
//! - Eviction is byte-weighted LRU within the configured budget.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use moka::future::Cache;
use tracing::{debug, warn};

/// Default cache budget: 1 GiB of rendered frames.
pub const DEFAULT_CACHE_SIZE_BYTES: u64 = 1024 * 1024 * 1024;

/// Weight charged for a negative entry.
const FAILED_ENTRY_WEIGHT: u32 = 64;

/// Cache key: the source a frame belongs to plus the entry name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub source: String,
    pub name: String,
}

impl CacheKey {
    pub fn new(source: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.name)
    }
}

/// A cached render outcome.
#[derive(Debug, Clone)]
pub enum CachedArtifact {
    /// Rendered bytes, shared with any in-flight copy operations.
    Ready(Arc<Vec<u8>>),
    /// The build failed; retried only after the cache is cleared.
    Failed,
}

impl CachedArtifact {
    pub fn bytes(&self) -> Option<&Arc<Vec<u8>>> {
        match self {
            CachedArtifact::Ready(bytes) => Some(bytes),
            CachedArtifact::Failed => None,
        }
    }
}

/// Cache statistics snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub failed_builds: u64,
    pub entry_count: u64,
    pub size_bytes: u64,
}

/// Byte-bounded artifact cache with per-key build coalescing.
pub struct ArtifactCache {
    cache: Cache<CacheKey, CachedArtifact>,
    max_size_bytes: u64,
    hits: AtomicU64,
    misses: AtomicU64,
    failed_builds: AtomicU64,
}

impl ArtifactCache {
    pub fn new(max_size_bytes: u64) -> Self {
        let cache = Cache::builder()
            .weigher(|_key: &CacheKey, value: &CachedArtifact| match value {
                CachedArtifact::Ready(bytes) => bytes.len().min(u32::MAX as usize) as u32,
                CachedArtifact::Failed => FAILED_ENTRY_WEIGHT,
            })
            .max_capacity(max_size_bytes)
            .build();

        Self {
            cache,
            max_size_bytes,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            failed_builds: AtomicU64::new(0),
        }
    }

    /// Probe the cache without building.
    pub async fn get(&self, key: &CacheKey) -> Option<CachedArtifact> {
        match self.cache.get(key).await {
            Some(artifact) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(artifact)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Fetch `key`, running `build` on a miss.
    ///
    /// Concurrent callers for the same key converge on one build. A build
    /// error is logged and stored as [`CachedArtifact::Failed`].
    pub async fn get_or_build<F, Fut, E>(&self, key: CacheKey, build: F) -> CachedArtifact
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, E>>,
        E: fmt::Display,
    {
        if let Some(artifact) = self.get(&key).await {
            return artifact;
        }

        let display_key = key.clone();
        self.cache
            .get_with(key, async {
                match build().await {
                    Ok(bytes) => {
                        debug!(key = %display_key, size = bytes.len(), "Cached new artifact");
                        CachedArtifact::Ready(Arc::new(bytes))
                    }
                    Err(e) => {
                        self.failed_builds.fetch_add(1, Ordering::Relaxed);
                        warn!(key = %display_key, error = %e, "Artifact build failed");
                        CachedArtifact::Failed
                    }
                }
            })
            .await
    }

    /// Insert a pre-rendered artifact.
    pub async fn put(&self, key: CacheKey, bytes: Vec<u8>) {
        self.cache
            .insert(key, CachedArtifact::Ready(Arc::new(bytes)))
            .await;
        self.cache.run_pending_tasks().await;
    }

    /// Mark a key as failed without building.
    pub async fn mark_load_failed(&self, key: CacheKey) {
        self.failed_builds.fetch_add(1, Ordering::Relaxed);
        self.cache.insert(key, CachedArtifact::Failed).await;
    }

    /// Drop every entry, positive and negative.
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            failed_builds: self.failed_builds.load(Ordering::Relaxed),
            entry_count: self.cache.entry_count(),
            size_bytes: self.cache.weighted_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn key(name: &str) -> CacheKey {
        CacheKey::new("/clips/a.mcraw", name)
    }

    #[tokio::test]
    async fn test_get_or_build_builds_once() {
        let cache = ArtifactCache::new(10_000_000);
        let builds = AtomicUsize::new(0);

        for _ in 0..3 {
            let artifact = cache
                .get_or_build(key("frame-000001.dng"), || async {
                    builds.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(vec![1, 2, 3])
                })
                .await;
            assert_eq!(artifact.bytes().unwrap().as_slice(), &[1, 2, 3]);
        }

        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_builds_coalesce() {
        let cache = Arc::new(ArtifactCache::new(10_000_000));
        let builds = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let builds = Arc::clone(&builds);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_build(key("frame-000042.dng"), || async move {
                        builds.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, String>(vec![42u8; 100])
                    })
                    .await
            }));
        }

        for handle in handles {
            let artifact = handle.await.unwrap();
            assert_eq!(artifact.bytes().unwrap().len(), 100);
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_build_is_negative_cached() {
        let cache = ArtifactCache::new(10_000_000);
        let builds = AtomicUsize::new(0);

        for _ in 0..3 {
            let artifact = cache
                .get_or_build(key("broken.dng"), || async {
                    builds.fetch_add(1, Ordering::SeqCst);
                    Err::<Vec<u8>, _>("decode error".to_string())
                })
                .await;
            assert!(artifact.bytes().is_none());
        }

        // Only the first read ran the builder.
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().failed_builds, 1);
    }

    #[tokio::test]
    async fn test_clear_purges_negative_entries() {
        let cache = ArtifactCache::new(10_000_000);

        cache.mark_load_failed(key("frame.dng")).await;
        assert!(cache.get(&key("frame.dng")).await.is_some());

        cache.clear();

        let artifact = cache
            .get_or_build(key("frame.dng"), || async { Ok::<_, String>(vec![9]) })
            .await;
        assert_eq!(artifact.bytes().unwrap().as_slice(), &[9]);
    }

    #[tokio::test]
    async fn test_eviction_respects_byte_budget() {
        let cache = ArtifactCache::new(2500);

        for i in 0..3 {
            cache.put(key(&format!("frame-{i}.dng")), vec![0u8; 1000]).await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(
            cache.stats().size_bytes <= 2500,
            "cache exceeded budget: {} bytes",
            cache.stats().size_bytes
        );
    }

    #[tokio::test]
    async fn test_stats_track_hits_and_misses() {
        let cache = ArtifactCache::new(10_000);
        cache.put(key("a.dng"), vec![1]).await;

        cache.get(&key("a.dng")).await;
        cache.get(&key("missing.dng")).await;

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}
