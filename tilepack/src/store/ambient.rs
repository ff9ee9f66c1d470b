//! Opportunistic cache for resources not pinned to any pack.
//!
//! Backed by `moka::future::Cache`: lock-free reads and concurrent writes
//! without blocking the Tokio runtime. There is no size-based eviction policy
//! here; clearing is always total and caller-triggered.

use std::sync::Arc;

use futures::FutureExt;
use moka::future::Cache;

use crate::resource::ResourceKey;

/// Bulk-clearable cache of incidentally fetched resources.
#[derive(Debug)]
pub struct AmbientCache {
    cache: Cache<String, Arc<Vec<u8>>>,
}

impl Default for AmbientCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AmbientCache {
    /// Creates an empty ambient cache.
    pub fn new() -> Self {
        Self {
            cache: Cache::builder().build(),
        }
    }

    /// Stores bytes for a key.
    ///
    /// Callers must not route pack-referenced keys through this path; the
    /// manager checks the pack store first.
    pub async fn put(&self, key: &ResourceKey, bytes: Vec<u8>) {
        self.cache.insert(key.cache_key(), Arc::new(bytes)).await;
        // Flush moka's pending maintenance so entry_count stays accurate.
        self.cache.run_pending_tasks().await;
    }

    /// Reads bytes for a key, if cached.
    pub async fn get(&self, key: &ResourceKey) -> Option<Arc<Vec<u8>>> {
        self.cache.get(&key.cache_key()).await
    }

    /// Removes every entry. Pack resources are untouched; they live in the
    /// pack store.
    pub fn clear(&self) {
        self.cache.invalidate_all();
        // Run pending tasks to complete the invalidation.
        let _ = self.cache.run_pending_tasks().now_or_never();
    }

    /// Approximate number of cached entries.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}
