//! The download engine.
//!
//! One engine drives the downloads for every pack. A run enumerates the
//! resources a pack's region implies (style document first, then the
//! sprite and glyph assets the style references, then every tile in the
//! bounding box) and fetches whatever the store does not already hold valid.
//!
//! Fan-out is bounded twice: a per-run semaphore caps concurrent fetches for
//! one pack, and a shared semaphore caps outstanding network work across all
//! packs. Transient failures retry with exponential backoff; permanent
//! failures are recorded and the run keeps going. Cancellation is
//! cooperative: a cancelled run issues no new fetches, and results of fetches
//! already in flight are discarded once the run's token is stale.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::events::{EventBus, PackEvent};
use crate::manager::pack::{PackRecord, PackState, RunToken};
use crate::resource::{
    style_dependency_keys, FetchError, FetchedResource, ResourceKey, ResourceProvider,
};
use crate::store::{PackStore, StoreError};

/// Drives resource downloads for packs.
pub(crate) struct DownloadEngine {
    provider: Arc<dyn ResourceProvider>,
    store: Arc<PackStore>,
    bus: EventBus,
    config: EngineConfig,
    /// Process-wide bound on outstanding fetches, shared by all runs.
    global_permits: Arc<Semaphore>,
}

/// Outcome of registering a pack's reference on an already-stored key.
enum Reference {
    /// The pack already referenced the key.
    Held,
    /// A new reference was taken on the stored entry.
    Added,
    /// The entry disappeared before the reference could be taken.
    Gone,
    /// The run is no longer current.
    Stale,
    /// The store failed; the run has been aborted.
    Failed,
}

impl DownloadEngine {
    pub(crate) fn new(
        provider: Arc<dyn ResourceProvider>,
        store: Arc<PackStore>,
        bus: EventBus,
        config: EngineConfig,
    ) -> Arc<Self> {
        let global_permits = Arc::new(Semaphore::new(config.global_fetch_limit));
        Arc::new(Self {
            provider,
            store,
            bus,
            config,
            global_permits,
        })
    }

    /// Executes one download run for a pack.
    ///
    /// The caller has already transitioned the pack to Active and registered
    /// `run` as the pack's current run token.
    pub(crate) async fn run(self: Arc<Self>, pack: Arc<PackRecord>, run: RunToken) {
        let pack_id = pack.id;
        let tiles = pack.region.tile_coords();
        info!(%pack_id, tiles = tiles.len(), "download run starting");

        // A resumed run starts from what survived the previous one: every
        // resource the pack already references and the store still holds
        // valid counts as completed up front. Progress therefore never moves
        // backwards across suspend and resume. Expected covers the style plus
        // every tile plus the seeded sprite/glyph assets; assets the style
        // references beyond those join once the style is parsed.
        let mut seeded = HashSet::new();
        let mut store_failure = None;
        {
            let mut inner = pack.inner.lock();
            if !run.is_current(&inner) {
                return;
            }
            let mut seeded_bytes: u64 = 0;
            let mut seeded_deps: u64 = 0;
            for key in &inner.resources {
                match self.store.get(key) {
                    Ok(Some(stored)) if stored.valid => {
                        seeded_bytes += stored.bytes.len() as u64;
                        if matches!(
                            key,
                            ResourceKey::Sprite { .. } | ResourceKey::GlyphRange { .. }
                        ) {
                            seeded_deps += 1;
                        }
                        seeded.insert(key.clone());
                    }
                    Ok(_) => {}
                    Err(err) => {
                        store_failure = Some((key.clone(), err));
                        break;
                    }
                }
            }
            if store_failure.is_none() {
                inner.progress.resources_expected = 1 + tiles.len() as u64 + seeded_deps;
                inner.progress.resources_completed = seeded.len() as u64;
                inner.progress.bytes_completed = seeded_bytes;
                inner.progress.tiles_exceeded_quota = false;
                self.bus.publish(PackEvent::ProgressChanged {
                    pack_id,
                    progress: inner.progress.clone(),
                });
            }
        }
        if let Some((key, err)) = store_failure {
            self.handle_store_failure(&pack, &run, &key, &err);
            self.finish_run(&pack, &run);
            return;
        }
        let seeded = Arc::new(seeded);

        // Style document first; sprite and glyph keys come out of it.
        let style_key = ResourceKey::Style {
            url: pack.region.style_url().to_string(),
        };
        let style_done = self.process_resource(&pack, &run, &style_key, &seeded).await;

        let mut dep_keys = Vec::new();
        if style_done {
            match self.store.get(&style_key) {
                Ok(Some(stored)) => match style_dependency_keys(&stored.bytes) {
                    Ok(keys) => dep_keys = keys,
                    Err(err) => self.publish_resource_error(&pack, &run, &style_key, &err),
                },
                Ok(None) => {}
                Err(err) => self.handle_store_failure(&pack, &run, &style_key, &err),
            }
        }

        // Seeded assets are already in both counts; only new ones grow
        // expected.
        let new_deps = dep_keys.iter().filter(|k| !seeded.contains(*k)).count() as u64;
        if new_deps > 0 {
            let mut inner = pack.inner.lock();
            if run.is_current(&inner) {
                inner.progress.resources_expected += new_deps;
                self.bus.publish(PackEvent::ProgressChanged {
                    pack_id,
                    progress: inner.progress.clone(),
                });
            }
        }

        self.fetch_batch(&pack, &run, dep_keys, &seeded).await;

        let tile_keys = tiles
            .into_iter()
            .map(|coord| ResourceKey::Tile { coord })
            .collect();
        self.fetch_batch(&pack, &run, tile_keys, &seeded).await;

        self.finish_run(&pack, &run);
    }

    /// Fetches a batch of keys with bounded fan-out.
    ///
    /// Tile keys are counted against the optional maximum-tiles ceiling; once
    /// the ceiling is reached no further tile fetches are issued and one
    /// `QuotaReached` event fires.
    async fn fetch_batch(
        self: &Arc<Self>,
        pack: &Arc<PackRecord>,
        run: &RunToken,
        keys: Vec<ResourceKey>,
        seeded: &Arc<HashSet<ResourceKey>>,
    ) {
        let local_permits = Arc::new(Semaphore::new(self.config.fan_out));
        let mut tasks = JoinSet::new();
        let mut tiles_issued: u64 = 0;

        for key in keys {
            if run.cancel.is_cancelled() {
                break;
            }

            if key.is_tile() {
                if let Some(max_tiles) = self.config.max_tiles {
                    if tiles_issued >= max_tiles {
                        self.reach_quota(pack, run, max_tiles);
                        break;
                    }
                }
                tiles_issued += 1;
            }

            // Both permits bound concurrency; tasks drop them on completion,
            // so this loop resumes as earlier fetches resolve.
            let Ok(local) = Arc::clone(&local_permits).acquire_owned().await else {
                break;
            };
            let Ok(global) = Arc::clone(&self.global_permits).acquire_owned().await else {
                break;
            };
            if run.cancel.is_cancelled() {
                break;
            }

            let engine = Arc::clone(self);
            let pack = Arc::clone(pack);
            let run = run.clone();
            let seeded = Arc::clone(seeded);
            tasks.spawn(async move {
                let _permits = (local, global);
                engine.process_resource(&pack, &run, &key, &seeded).await;
            });
        }

        while tasks.join_next().await.is_some() {}
    }

    /// Ensures one resource is stored and valid for the pack.
    ///
    /// Returns true when the resource is resolved for this run (already valid
    /// in the store, or fetched and written). Failures and discarded
    /// stale-run results return false. Keys in `seeded` were counted when the
    /// run started and are never recorded again.
    async fn process_resource(
        &self,
        pack: &Arc<PackRecord>,
        run: &RunToken,
        key: &ResourceKey,
        seeded: &HashSet<ResourceKey>,
    ) -> bool {
        // Skip the network when the store already holds a valid copy.
        match self.store.get(key) {
            Ok(Some(stored)) if stored.valid => {
                match self.reference_existing(pack, run, key) {
                    Reference::Held => {
                        debug!(pack_id = %pack.id, %key, "resource already stored; skipping fetch");
                        if !seeded.contains(key) {
                            self.record_completed(pack, run, stored.bytes.len() as u64);
                        }
                        return true;
                    }
                    Reference::Added => {
                        debug!(pack_id = %pack.id, %key, "resource already stored; skipping fetch");
                        self.record_completed(pack, run, stored.bytes.len() as u64);
                        return true;
                    }
                    // Entry vanished between read and retain; fall through
                    // and fetch it like any other miss.
                    Reference::Gone => {}
                    Reference::Stale | Reference::Failed => return false,
                }
            }
            Ok(_) => {}
            Err(err) => {
                self.handle_store_failure(pack, run, key, &err);
                return false;
            }
        }

        if run.cancel.is_cancelled() {
            return false;
        }

        let fetched = match self.fetch_with_retry(key, &run.cancel).await {
            Some(Ok(fetched)) => fetched,
            Some(Err(err)) => {
                self.publish_resource_error(pack, run, key, &err);
                return false;
            }
            None => return false, // cancelled mid-retry
        };

        // Late cancellation check: a fetch that raced a suspend or removal
        // is discarded, not written.
        let newly_referenced = {
            let mut inner = pack.inner.lock();
            if !run.is_current(&inner) {
                debug!(pack_id = %pack.id, %key, "discarding fetch result for stale run");
                return false;
            }
            inner.resources.insert(key.clone())
        };

        let byte_len = fetched.bytes.len() as u64;
        let FetchedResource { bytes, .. } = fetched;
        let written = if newly_referenced {
            self.store.put_referenced(key, bytes)
        } else {
            self.store.put(key, bytes)
        };
        if let Err(err) = written {
            self.handle_store_failure(pack, run, key, &err);
            return false;
        }

        // A seeded key that was invalidated mid-run is refreshed here, but
        // it already counted when the run started.
        if !seeded.contains(key) {
            self.record_completed(pack, run, byte_len);
        }
        true
    }

    /// Registers the pack's reference on an already-stored key.
    fn reference_existing(
        &self,
        pack: &Arc<PackRecord>,
        run: &RunToken,
        key: &ResourceKey,
    ) -> Reference {
        {
            let mut inner = pack.inner.lock();
            if !run.is_current(&inner) {
                return Reference::Stale;
            }
            if !inner.resources.insert(key.clone()) {
                return Reference::Held;
            }
        }
        match self.store.retain(key) {
            Ok(true) => Reference::Added,
            Ok(false) => {
                // Another pack released the last reference in between.
                pack.inner.lock().resources.remove(key);
                Reference::Gone
            }
            Err(err) => {
                pack.inner.lock().resources.remove(key);
                self.handle_store_failure(pack, run, key, &err);
                Reference::Failed
            }
        }
    }

    /// Fetches one resource, retrying transient failures with exponential
    /// backoff up to the configured attempt cap.
    ///
    /// Returns `None` when cancelled between attempts.
    async fn fetch_with_retry(
        &self,
        key: &ResourceKey,
        cancel: &CancellationToken,
    ) -> Option<Result<FetchedResource, FetchError>> {
        let mut delay = self.config.initial_backoff;
        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            match self.provider.fetch(key).await {
                Ok(fetched) => return Some(Ok(fetched)),
                Err(err) if err.is_transient() && attempt < self.config.max_attempts => {
                    debug!(
                        %key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient fetch failure; backing off"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = (delay * 2).min(self.config.max_backoff);
                    attempt += 1;
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }

    fn record_completed(&self, pack: &Arc<PackRecord>, run: &RunToken, byte_len: u64) {
        let mut inner = pack.inner.lock();
        if !run.is_current(&inner) {
            return;
        }
        inner.progress.resources_completed += 1;
        inner.progress.bytes_completed += byte_len;
        debug_assert!(
            inner.progress.resources_completed <= inner.progress.resources_expected,
            "completed must never exceed expected"
        );
        // Published under the pack lock to keep per-pack event order FIFO.
        self.bus.publish(PackEvent::ProgressChanged {
            pack_id: pack.id,
            progress: inner.progress.clone(),
        });
    }

    fn reach_quota(&self, pack: &Arc<PackRecord>, run: &RunToken, max_tiles: u64) {
        let mut inner = pack.inner.lock();
        if !run.is_current(&inner) || inner.progress.tiles_exceeded_quota {
            return;
        }
        inner.progress.tiles_exceeded_quota = true;
        info!(pack_id = %pack.id, max_tiles, "tile quota reached; no further tile fetches");
        self.bus.publish(PackEvent::QuotaReached {
            pack_id: pack.id,
            max_tiles,
        });
    }

    fn publish_resource_error(
        &self,
        pack: &Arc<PackRecord>,
        run: &RunToken,
        key: &ResourceKey,
        err: &FetchError,
    ) {
        warn!(pack_id = %pack.id, %key, error = %err, "resource permanently failed");
        let inner = pack.inner.lock();
        if !run.is_current(&inner) {
            return;
        }
        self.bus.publish(PackEvent::ResourceError {
            pack_id: pack.id,
            reason: format!("{key}: {err}"),
        });
    }

    /// A store failure is fatal to this pack's in-flight downloads: cancel
    /// the run and surface the failure as an event. The process keeps going.
    fn handle_store_failure(
        &self,
        pack: &Arc<PackRecord>,
        run: &RunToken,
        key: &ResourceKey,
        err: &StoreError,
    ) {
        warn!(pack_id = %pack.id, %key, error = %err, "store failure; aborting pack downloads");
        run.cancel.cancel();
        let inner = pack.inner.lock();
        if !run.is_current(&inner) {
            return;
        }
        self.bus.publish(PackEvent::ResourceError {
            pack_id: pack.id,
            reason: format!("{key}: {err}"),
        });
    }

    /// Closes out a run: clears the run handle and, when every expected
    /// resource completed, transitions the pack to Complete.
    fn finish_run(&self, pack: &Arc<PackRecord>, run: &RunToken) {
        let mut inner = pack.inner.lock();
        if !run.is_current(&inner) {
            // Suspended, removed, or superseded; that path owns the state.
            return;
        }
        inner.run = None;

        let completed = inner.progress.resources_completed;
        let expected = inner.progress.resources_expected;
        if completed == expected {
            inner.state = PackState::Complete;
            info!(pack_id = %pack.id, resources = completed, "pack complete");
            self.bus.publish(PackEvent::Completed { pack_id: pack.id });
        } else if run.cancel.is_cancelled() {
            debug!(pack_id = %pack.id, completed, expected, "download run aborted");
        } else {
            // Permanent failures or quota left resources unresolved; the
            // pack stays Active and the event stream carries the details.
            info!(pack_id = %pack.id, completed, expected, "download run ended with unresolved resources");
        }
    }
}
