//! Integration tests for the pack lifecycle.
//!
//! These tests exercise the full flow through the public API:
//! - add → resume → Completed event → Complete snapshot
//! - resource sharing and reference counting across overlapping packs
//! - invalidate, remove, reset, and ambient cache interactions
//!
//! Run with: `cargo test --test lifecycle`

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tilepack::resource::{BoxFuture, FetchError, FetchedResource};
use tilepack::{
    EngineConfig, LatLon, PackEvent, PackId, PackManager, PackState, Region, ResourceKey,
    ResourceProvider,
};

// ============================================================================
// Helper Functions
// ============================================================================

/// In-memory provider that serves a fixed style and synthetic payloads,
/// counting every fetch.
struct FakeOrigin {
    style: Vec<u8>,
    fetch_counts: Mutex<HashMap<String, u32>>,
}

impl FakeOrigin {
    fn new() -> Self {
        Self {
            style: b"{\"version\": 8}".to_vec(),
            fetch_counts: Mutex::new(HashMap::new()),
        }
    }

    fn with_style(style: &[u8]) -> Self {
        Self {
            style: style.to_vec(),
            fetch_counts: Mutex::new(HashMap::new()),
        }
    }

    fn fetch_count(&self, key: &ResourceKey) -> u32 {
        self.fetch_counts
            .lock()
            .unwrap()
            .get(&key.cache_key())
            .copied()
            .unwrap_or(0)
    }

    fn total_fetches(&self) -> u32 {
        self.fetch_counts.lock().unwrap().values().sum()
    }
}

impl ResourceProvider for FakeOrigin {
    fn fetch(&self, key: &ResourceKey) -> BoxFuture<'_, Result<FetchedResource, FetchError>> {
        let cache_key = key.cache_key();
        let is_style = matches!(key, ResourceKey::Style { .. });
        Box::pin(async move {
            *self
                .fetch_counts
                .lock()
                .unwrap()
                .entry(cache_key.clone())
                .or_insert(0) += 1;
            let bytes = if is_style {
                self.style.clone()
            } else {
                format!("payload:{cache_key}").into_bytes()
            };
            Ok(FetchedResource::cacheable(bytes))
        })
    }
}

/// Burlington, VT bounding box. At zoom 0 this maps to exactly one tile.
fn region(min_zoom: u8, max_zoom: u8) -> Region {
    Region::new(
        LatLon::new(44.464746, -73.2158599).unwrap(),
        LatLon::new(44.528509, -73.1499419).unwrap(),
        min_zoom,
        max_zoom,
        "http://localhost/styles.json",
    )
    .unwrap()
}

fn style_key() -> ResourceKey {
    ResourceKey::Style {
        url: "http://localhost/styles.json".to_string(),
    }
}

fn make_manager(origin: Arc<FakeOrigin>) -> PackManager {
    PackManager::new(
        origin as Arc<dyn ResourceProvider>,
        EngineConfig::default().with_initial_backoff(Duration::from_millis(1)),
    )
}

/// Blocks until the pack reaches Complete or five seconds elapse.
async fn wait_for_complete(manager: &PackManager, id: PackId) {
    let mut events = manager.subscribe();
    if manager.get(id).unwrap().state == PackState::Complete {
        return;
    }
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.next().await {
            if matches!(event, PackEvent::Completed { pack_id } if pack_id == id) {
                return;
            }
            if manager.get(id).unwrap().state == PackState::Complete {
                return;
            }
        }
    })
    .await
    .expect("pack should complete");
}

// ============================================================================
// Download Flow
// ============================================================================

/// A zoom-0 pack downloads the style plus one tile and ends Complete.
#[tokio::test]
async fn test_full_download_flow() {
    let origin = Arc::new(FakeOrigin::new());
    let manager = make_manager(Arc::clone(&origin));

    let pack = manager.add_pack(region(0, 0), b"city pack".to_vec());
    assert_eq!(pack.state, PackState::Inactive);

    let mut events = manager.subscribe();
    manager.resume(pack.id).unwrap();
    wait_for_complete(&manager, pack.id).await;

    let done = manager.get(pack.id).unwrap();
    assert_eq!(done.state, PackState::Complete);
    assert_eq!(done.progress.resources_expected, 2);
    assert_eq!(done.progress.resources_completed, 2);
    assert_eq!(done.context, b"city pack".to_vec());
    assert_eq!(origin.total_fetches(), 2);

    // Progress events are monotonic and nothing follows Completed.
    let mut last_completed = 0;
    let mut saw_completed = false;
    while let Some(event) = events.try_next() {
        assert!(!saw_completed, "no events may follow Completed");
        match event {
            PackEvent::ProgressChanged { progress, .. } => {
                assert!(progress.resources_completed >= last_completed);
                assert!(progress.resources_completed <= progress.resources_expected);
                last_completed = progress.resources_completed;
            }
            PackEvent::Completed { pack_id } => {
                assert_eq!(pack_id, pack.id);
                saw_completed = true;
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert!(saw_completed);
}

/// A style that references sprite and glyph assets pulls them in as pack
/// resources.
#[tokio::test]
async fn test_style_dependencies_are_downloaded() {
    let style = br#"{
        "version": 8,
        "sprite": "http://localhost/sprite",
        "glyphs": "http://localhost/fonts/{fontstack}/{range}.pbf"
    }"#;
    let origin = Arc::new(FakeOrigin::with_style(style));
    let manager = make_manager(Arc::clone(&origin));

    let pack = manager.add_pack(region(0, 0), Vec::new());
    manager.resume(pack.id).unwrap();
    wait_for_complete(&manager, pack.id).await;

    let done = manager.get(pack.id).unwrap();
    assert_eq!(done.progress.resources_completed, 4); // style + sprite + glyphs + tile
    assert_eq!(manager.store().entry_count(), 4);
}

/// A multi-zoom region enumerates tiles across its whole zoom range.
#[tokio::test]
async fn test_multi_zoom_region_downloads_every_level() {
    let origin = Arc::new(FakeOrigin::new());
    let manager = make_manager(Arc::clone(&origin));

    let r = region(0, 2);
    let expected_tiles = r.tile_count();
    assert!(expected_tiles >= 3, "zoom 0..=2 spans at least three tiles");

    let pack = manager.add_pack(r, Vec::new());
    manager.resume(pack.id).unwrap();
    wait_for_complete(&manager, pack.id).await;

    let done = manager.get(pack.id).unwrap();
    assert_eq!(done.progress.resources_completed, 1 + expected_tiles);
}

/// Resume while a run is in flight is a no-op; resume of a Complete pack is
/// a no-op.
#[tokio::test]
async fn test_resume_is_idempotent() {
    let origin = Arc::new(FakeOrigin::new());
    let manager = make_manager(Arc::clone(&origin));

    let pack = manager.add_pack(region(0, 0), Vec::new());
    manager.resume(pack.id).unwrap();
    manager.resume(pack.id).unwrap();
    manager.resume(pack.id).unwrap();
    wait_for_complete(&manager, pack.id).await;

    assert_eq!(origin.fetch_count(&style_key()), 1, "style fetched exactly once");

    manager.resume(pack.id).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(origin.total_fetches(), 2, "complete pack never re-downloads");
}

// ============================================================================
// Sharing and Reference Counting
// ============================================================================

/// Two packs over the same region store each resource once; removing one
/// pack keeps the shared entries alive for the other.
#[tokio::test]
async fn test_overlapping_packs_share_resources() {
    let origin = Arc::new(FakeOrigin::new());
    let manager = make_manager(Arc::clone(&origin));

    let a = manager.add_pack(region(0, 0), Vec::new());
    manager.resume(a.id).unwrap();
    wait_for_complete(&manager, a.id).await;

    let b = manager.add_pack(region(0, 0), Vec::new());
    manager.resume(b.id).unwrap();
    wait_for_complete(&manager, b.id).await;

    assert_eq!(origin.total_fetches(), 2, "pack b reuses every stored resource");
    assert_eq!(manager.store().entry_count(), 2);

    manager.remove(a.id).unwrap();
    assert_eq!(manager.store().entry_count(), 2, "pack b still holds references");
    assert!(manager.store().contains_valid(&style_key()).unwrap());

    manager.remove(b.id).unwrap();
    assert_eq!(manager.store().entry_count(), 0, "last reference releases the entry");
}

/// A removed pack's id stays dead forever and is never reused.
#[tokio::test]
async fn test_removed_pack_is_permanently_gone() {
    let origin = Arc::new(FakeOrigin::new());
    let manager = make_manager(origin);

    let pack = manager.add_pack(region(0, 0), Vec::new());
    manager.remove(pack.id).unwrap();

    assert!(manager.get(pack.id).is_err());
    assert!(manager.resume(pack.id).is_err());
    assert!(manager.suspend(pack.id).is_err());
    assert!(manager.invalidate(pack.id).is_err());
    assert!(manager.remove(pack.id).is_err());

    let next = manager.add_pack(region(0, 0), Vec::new());
    assert_ne!(next.id, pack.id);
    assert!(manager.list().iter().all(|s| s.id != pack.id));
}

// ============================================================================
// Invalidation and Reset
// ============================================================================

/// Invalidation keeps entries readable but clears their validity, so the
/// next resume downloads everything again.
#[tokio::test]
async fn test_invalidate_marks_resources_stale() {
    let origin = Arc::new(FakeOrigin::new());
    let manager = make_manager(Arc::clone(&origin));

    let pack = manager.add_pack(region(0, 0), Vec::new());
    manager.resume(pack.id).unwrap();
    wait_for_complete(&manager, pack.id).await;

    manager.invalidate(pack.id).unwrap();

    let after = manager.get(pack.id).unwrap();
    assert_eq!(after.state, PackState::Inactive);
    assert_eq!(after.progress.resources_completed, 0);

    // Old bytes still read back, flagged invalid.
    let stored = manager.store().get(&style_key()).unwrap().unwrap();
    assert!(!stored.valid);
    assert_eq!(stored.bytes, b"{\"version\": 8}".to_vec());
    assert!(!manager.store().contains_valid(&style_key()).unwrap());

    manager.resume(pack.id).unwrap();
    wait_for_complete(&manager, pack.id).await;
    assert_eq!(origin.total_fetches(), 4, "both resources re-downloaded");
    assert!(manager.store().contains_valid(&style_key()).unwrap());
}

/// Reset empties the store and the ambient cache but keeps every pack's
/// identity, region, and context.
#[tokio::test]
async fn test_reset_database_clears_storage_not_identities() {
    let origin = Arc::new(FakeOrigin::new());
    let manager = make_manager(Arc::clone(&origin));

    let pack = manager.add_pack(region(0, 0), b"survives".to_vec());
    manager.resume(pack.id).unwrap();
    wait_for_complete(&manager, pack.id).await;
    manager
        .fetch_ambient(&ResourceKey::tile(7, 1, 1))
        .await
        .unwrap();

    manager.reset_database();

    assert_eq!(manager.store().entry_count(), 0);
    assert_eq!(manager.ambient_entry_count(), 0);

    let after = manager.get(pack.id).unwrap();
    assert_eq!(after.state, PackState::Inactive);
    assert_eq!(after.progress.resources_completed, 0);
    assert_eq!(after.context, b"survives".to_vec());

    manager.resume(pack.id).unwrap();
    wait_for_complete(&manager, pack.id).await;
    assert_eq!(manager.get(pack.id).unwrap().state, PackState::Complete);
}

// ============================================================================
// Quota
// ============================================================================

/// A pack that would exceed the tile ceiling stops issuing tile fetches and
/// reports the quota exactly once.
#[tokio::test]
async fn test_tile_quota_stops_downloads() {
    let origin = Arc::new(FakeOrigin::new());
    let manager = PackManager::new(
        Arc::clone(&origin) as Arc<dyn ResourceProvider>,
        EngineConfig::default()
            .with_initial_backoff(Duration::from_millis(1))
            .with_max_tiles(2),
    );

    let mut events = manager.subscribe();
    let pack = manager.add_pack(region(0, 3), Vec::new());
    manager.resume(pack.id).unwrap();

    // The run ends without completing; wait for it to settle.
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if manager.get(pack.id).unwrap().progress.tiles_exceeded_quota {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("quota should be reached");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snapshot = manager.get(pack.id).unwrap();
    assert_eq!(snapshot.state, PackState::Active, "quota never completes a pack");
    assert!(snapshot.progress.tiles_exceeded_quota);
    assert!(snapshot.progress.resources_completed < snapshot.progress.resources_expected);

    let mut quota_events = 0;
    while let Some(event) = events.try_next() {
        match event {
            PackEvent::QuotaReached { pack_id, max_tiles } => {
                assert_eq!(pack_id, pack.id);
                assert_eq!(max_tiles, 2);
                quota_events += 1;
            }
            PackEvent::Completed { .. } => panic!("pack must not complete"),
            _ => {}
        }
    }
    assert_eq!(quota_events, 1);
}

// ============================================================================
// Ambient Cache
// ============================================================================

/// Ambient fetches hit the pack store first, then the ambient cache, then
/// the network; clearing the ambient cache never touches pack resources.
#[tokio::test]
async fn test_ambient_fetch_layering() {
    let origin = Arc::new(FakeOrigin::new());
    let manager = make_manager(Arc::clone(&origin));

    let pack = manager.add_pack(region(0, 0), Vec::new());
    manager.resume(pack.id).unwrap();
    wait_for_complete(&manager, pack.id).await;

    // Pack-stored tile: served without a network fetch.
    let pinned = ResourceKey::tile(0, 0, 0);
    manager.fetch_ambient(&pinned).await.unwrap();
    assert_eq!(origin.fetch_count(&pinned), 1, "only the pack run fetched it");

    // Unpinned tile: fetched once, then cached.
    let loose = ResourceKey::tile(8, 2, 2);
    manager.fetch_ambient(&loose).await.unwrap();
    manager.fetch_ambient(&loose).await.unwrap();
    assert_eq!(origin.fetch_count(&loose), 1);
    assert_eq!(manager.ambient_entry_count(), 1);

    manager.clear_ambient_cache();
    assert_eq!(manager.ambient_entry_count(), 0);
    assert_eq!(manager.store().entry_count(), 2, "pack resources survive");

    // Cold again after the clear.
    manager.fetch_ambient(&loose).await.unwrap();
    assert_eq!(origin.fetch_count(&loose), 2);
}

// ============================================================================
// Event Delivery
// ============================================================================

/// Subscribers only see events published after they subscribed.
#[tokio::test]
async fn test_no_event_history_replay() {
    let origin = Arc::new(FakeOrigin::new());
    let manager = make_manager(origin);

    let pack = manager.add_pack(region(0, 0), Vec::new());
    manager.resume(pack.id).unwrap();
    wait_for_complete(&manager, pack.id).await;

    let mut late = manager.subscribe();
    assert!(late.try_next().is_none(), "no replay of earlier events");
}
