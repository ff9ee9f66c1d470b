//! Pack lifecycle management.
//!
//! The [`PackManager`] is the crate's front door. It owns the pack table, the
//! resource store, the ambient cache, and the download engine, and it maps
//! lifecycle operations (add, resume, suspend, invalidate, remove, reset)
//! onto them.
//!
//! # Architecture
//!
//! Every pack is a [`PackRecord`] behind an `Arc`, keyed by id in a `BTreeMap`
//! so listings come back in creation order. Download runs execute on spawned
//! tasks; the manager hands each run a token whose sequence number fences it,
//! so a suspended or superseded run can never write progress or store entries
//! again.

pub(crate) mod pack;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::coord::Region;
use crate::engine::DownloadEngine;
use crate::error::PackError;
use crate::events::{EventBus, EventStream, PackEvent};
use crate::resource::{ResourceKey, ResourceProvider};
use crate::store::{AmbientCache, PackStore};

pub use pack::{PackId, PackProgress, PackSnapshot, PackState};

use pack::{PackRecord, RunToken};
use tokio_util::sync::CancellationToken;

/// Owns packs, their stored resources, and the download engine.
pub struct PackManager {
    store: Arc<PackStore>,
    ambient: Arc<AmbientCache>,
    provider: Arc<dyn ResourceProvider>,
    bus: EventBus,
    engine: Arc<DownloadEngine>,
    packs: RwLock<BTreeMap<u64, Arc<PackRecord>>>,
    next_id: AtomicU64,
}

impl PackManager {
    /// Creates a manager over the given provider with the given engine
    /// configuration.
    pub fn new(provider: Arc<dyn ResourceProvider>, config: EngineConfig) -> Self {
        let store = Arc::new(PackStore::new());
        let bus = EventBus::default();
        let engine = DownloadEngine::new(
            Arc::clone(&provider),
            Arc::clone(&store),
            bus.clone(),
            config,
        );
        Self {
            store,
            ambient: Arc::new(AmbientCache::new()),
            provider,
            bus,
            engine,
            packs: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribes to pack events published from this point on.
    pub fn subscribe(&self) -> EventStream {
        self.bus.subscribe()
    }

    /// Creates a new pack over `region` with an opaque caller context blob.
    ///
    /// The pack starts Inactive; nothing downloads until [`resume`] is
    /// called. The context bytes are stored verbatim and returned unchanged
    /// in every snapshot.
    ///
    /// [`resume`]: Self::resume
    pub fn add_pack(&self, region: Region, context: Vec<u8>) -> PackSnapshot {
        let id = PackId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        let record = Arc::new(PackRecord::new(id, region, context));
        let snapshot = record.snapshot();
        self.packs.write().insert(id.raw(), record);
        info!(pack_id = %id, "pack added");
        snapshot
    }

    /// Starts (or restarts) downloading the pack's resources.
    ///
    /// Idempotent: resuming a pack whose run is already in flight, or one
    /// that is Complete, does nothing. Resuming after a suspend starts a
    /// fresh run that re-enumerates the region and skips whatever the store
    /// already holds valid.
    pub fn resume(&self, id: PackId) -> Result<(), PackError> {
        let record = self.record(id)?;
        let token = {
            let mut inner = record.inner.lock();
            match inner.state {
                PackState::Complete => return Ok(()),
                PackState::Active if inner.run.is_some() => {
                    debug!(pack_id = %id, "resume ignored; run already in flight");
                    return Ok(());
                }
                _ => {}
            }
            inner.state = PackState::Active;
            let token = RunToken {
                cancel: CancellationToken::new(),
                seq: inner.next_seq,
            };
            inner.next_seq += 1;
            inner.run = Some(token.clone());
            token
        };

        let engine = Arc::clone(&self.engine);
        tokio::spawn(engine.run(record, token));
        Ok(())
    }

    /// Stops the pack's in-flight downloads.
    ///
    /// Already-stored resources stay stored and stay referenced. Results of
    /// fetches still in flight are discarded. A Complete pack is untouched.
    pub fn suspend(&self, id: PackId) -> Result<(), PackError> {
        let record = self.record(id)?;
        let mut inner = record.inner.lock();
        if let Some(run) = inner.run.take() {
            run.cancel.cancel();
        }
        if inner.state == PackState::Active {
            inner.state = PackState::Inactive;
            info!(pack_id = %id, "pack suspended");
        }
        Ok(())
    }

    /// Marks every resource the pack references as invalid.
    ///
    /// Invalid entries survive in the store (reads still serve them) but no
    /// longer satisfy the download engine's skip check, so a later [`resume`]
    /// re-fetches them. Any in-flight run is cancelled first. The pack ends
    /// Inactive with zeroed progress.
    ///
    /// [`resume`]: Self::resume
    pub fn invalidate(&self, id: PackId) -> Result<(), PackError> {
        let record = self.record(id)?;
        // One critical section: a concurrent resume cannot slip in between
        // cancelling the run and zeroing the progress, so no fresh run ever
        // has its counters clobbered mid-flight.
        let mut inner = record.inner.lock();
        if let Some(run) = inner.run.take() {
            run.cancel.cancel();
        }
        inner.state = PackState::Invalidating;
        let mut store_err = None;
        for key in &inner.resources {
            if let Err(err) = self.store.mark_invalid(key) {
                store_err = Some(err);
                break;
            }
        }
        inner.state = PackState::Inactive;
        if let Some(err) = store_err {
            return Err(err.into());
        }
        inner.progress = PackProgress::default();
        info!(pack_id = %id, resources = inner.resources.len(), "pack invalidated");
        self.bus.publish(PackEvent::ProgressChanged {
            pack_id: id,
            progress: inner.progress.clone(),
        });
        Ok(())
    }

    /// Removes the pack permanently.
    ///
    /// The pack's references on stored resources are released; entries whose
    /// last reference drops are deleted. Resources shared with other packs
    /// survive. The id is dead afterwards and every later operation on it
    /// fails with [`PackError::PackNotFound`].
    pub fn remove(&self, id: PackId) -> Result<(), PackError> {
        let record = self
            .packs
            .write()
            .remove(&id.raw())
            .ok_or(PackError::PackNotFound(id))?;

        let keys: Vec<ResourceKey> = {
            let mut inner = record.inner.lock();
            if let Some(run) = inner.run.take() {
                run.cancel.cancel();
            }
            inner.state = PackState::Deleted;
            inner.resources.drain().collect()
        };

        // Every key gets its release attempt; one failure must not leave the
        // remaining refcounts undecremented.
        let mut release_failures = 0usize;
        for key in &keys {
            if self.store.release(key).is_err() {
                release_failures += 1;
            }
        }
        if release_failures > 0 {
            warn!(pack_id = %id, release_failures, "releases failed during pack removal");
        }
        info!(pack_id = %id, resources = keys.len(), "pack removed");
        Ok(())
    }

    /// Empties the resource store and the ambient cache.
    ///
    /// Every run is cancelled and every pack drops back to Inactive with
    /// zeroed progress, keeping its id, region, and context. Resuming a pack
    /// afterwards downloads everything again.
    pub fn reset_database(&self) {
        let packs = self.packs.read();
        for record in packs.values() {
            let mut inner = record.inner.lock();
            if let Some(run) = inner.run.take() {
                run.cancel.cancel();
            }
            inner.state = PackState::Inactive;
            inner.progress = PackProgress::default();
            inner.resources.clear();
        }
        drop(packs);

        self.store.reset();
        self.ambient.clear();
        info!("store reset; all packs inactive");
    }

    /// Empties the ambient cache. Pack-referenced resources are untouched.
    pub fn clear_ambient_cache(&self) {
        self.ambient.clear();
        info!("ambient cache cleared");
    }

    /// Snapshots of every live pack, in creation order.
    pub fn list(&self) -> Vec<PackSnapshot> {
        self.packs.read().values().map(|r| r.snapshot()).collect()
    }

    /// Snapshot of one pack.
    pub fn get(&self, id: PackId) -> Result<PackSnapshot, PackError> {
        Ok(self.record(id)?.snapshot())
    }

    /// Fetches a resource for interactive use, outside any pack.
    ///
    /// Pack-stored resources are served from the store, even when marked
    /// invalid the entry is refreshed from the network first. Everything
    /// else goes through the ambient cache; responses the origin marked
    /// non-cacheable are returned but not retained.
    pub async fn fetch_ambient(&self, key: &ResourceKey) -> Result<Vec<u8>, PackError> {
        match self.store.get(key)? {
            Some(stored) if stored.valid => return Ok(stored.bytes),
            Some(_) => {
                // Lazy revalidation of an invalidated pack resource. The
                // reference count is untouched; only the payload refreshes.
                debug!(%key, "refreshing invalidated resource");
                let fetched = self.provider.fetch(key).await?;
                self.store.put(key, fetched.bytes.clone())?;
                return Ok(fetched.bytes);
            }
            None => {}
        }

        if let Some(bytes) = self.ambient.get(key).await {
            return Ok(bytes.as_ref().clone());
        }

        let fetched = self.provider.fetch(key).await?;
        if !fetched.must_revalidate {
            self.ambient.put(key, fetched.bytes.clone()).await;
        }
        Ok(fetched.bytes)
    }

    /// The underlying resource store.
    pub fn store(&self) -> &PackStore {
        &self.store
    }

    /// Approximate number of entries in the ambient cache.
    pub fn ambient_entry_count(&self) -> u64 {
        self.ambient.entry_count()
    }

    fn record(&self, id: PackId) -> Result<Arc<PackRecord>, PackError> {
        self.packs
            .read()
            .get(&id.raw())
            .cloned()
            .ok_or(PackError::PackNotFound(id))
    }
}
