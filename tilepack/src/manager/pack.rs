//! Pack identity, state, and progress types.

use std::collections::HashSet;
use std::fmt;

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::coord::Region;
use crate::resource::ResourceKey;

/// Opaque pack identifier, unique for the lifetime of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PackId(u64);

impl PackId {
    /// Builds an id from its raw value.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw numeric value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pack-{}", self.0)
    }
}

/// Lifecycle state of a pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PackState {
    /// Created or suspended; no download in progress.
    Inactive,
    /// A download run is (or was) in progress.
    Active,
    /// Every expected resource is downloaded.
    Complete,
    /// Transient: stored resources are being marked invalid.
    Invalidating,
    /// Terminal: the pack is gone and its id is invalid.
    Deleted,
}

/// Point-in-time progress snapshot for a pack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PackProgress {
    /// Resources the current enumeration expects in total.
    pub resources_expected: u64,
    /// Resources downloaded or verified so far. Never exceeds
    /// `resources_expected`.
    pub resources_completed: u64,
    /// Payload bytes accounted under `resources_completed`.
    pub bytes_completed: u64,
    /// True once the maximum-tiles ceiling stopped tile fetches.
    pub tiles_exceeded_quota: bool,
}

/// Public snapshot of one pack.
#[derive(Debug, Clone, PartialEq)]
pub struct PackSnapshot {
    /// The pack's id.
    pub id: PackId,
    /// The region the pack covers.
    pub region: Region,
    /// Caller-supplied metadata, returned verbatim.
    pub context: Vec<u8>,
    /// Current lifecycle state.
    pub state: PackState,
    /// Current progress.
    pub progress: PackProgress,
}

/// Handle identifying one download run of a pack.
///
/// The sequence number fences stale runs: a suspended or superseded run fails
/// the `is_current` check and discards its remaining results.
#[derive(Debug, Clone)]
pub(crate) struct RunToken {
    pub(crate) cancel: CancellationToken,
    pub(crate) seq: u64,
}

impl RunToken {
    pub(crate) fn is_current(&self, inner: &PackInner) -> bool {
        inner.run.as_ref().map(|r| r.seq) == Some(self.seq)
    }
}

/// Mutable pack state, guarded by the pack's lock.
#[derive(Debug)]
pub(crate) struct PackInner {
    pub(crate) state: PackState,
    pub(crate) progress: PackProgress,
    /// Keys this pack references in the store; used for invalidation and
    /// reference-count release on removal.
    pub(crate) resources: HashSet<ResourceKey>,
    pub(crate) run: Option<RunToken>,
    pub(crate) next_seq: u64,
}

/// One pack owned by the manager's pack table.
///
/// Immutable identity and region; everything mutable lives behind `inner`.
/// The lock is only ever held for short, non-blocking critical sections.
#[derive(Debug)]
pub(crate) struct PackRecord {
    pub(crate) id: PackId,
    pub(crate) region: Region,
    pub(crate) context: Vec<u8>,
    pub(crate) inner: Mutex<PackInner>,
}

impl PackRecord {
    pub(crate) fn new(id: PackId, region: Region, context: Vec<u8>) -> Self {
        Self {
            id,
            region,
            context,
            inner: Mutex::new(PackInner {
                state: PackState::Inactive,
                progress: PackProgress::default(),
                resources: HashSet::new(),
                run: None,
                next_seq: 0,
            }),
        }
    }

    /// Consistent snapshot of the pack for `list`/`get`.
    pub(crate) fn snapshot(&self) -> PackSnapshot {
        let inner = self.inner.lock();
        PackSnapshot {
            id: self.id,
            region: self.region.clone(),
            context: self.context.clone(),
            state: inner.state,
            progress: inner.progress.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::LatLon;

    fn region() -> Region {
        Region::new(
            LatLon::new(44.464746, -73.2158599).unwrap(),
            LatLon::new(44.528509, -73.1499419).unwrap(),
            0,
            0,
            "http://localhost/styles.json",
        )
        .unwrap()
    }

    #[test]
    fn test_new_pack_is_inactive_with_zero_progress() {
        let record = PackRecord::new(PackId::from_raw(1), region(), b"ctx".to_vec());
        let snapshot = record.snapshot();

        assert_eq!(snapshot.state, PackState::Inactive);
        assert_eq!(snapshot.progress, PackProgress::default());
        assert_eq!(snapshot.context, b"ctx".to_vec());
    }

    #[test]
    fn test_context_round_trips_verbatim() {
        // The context blob is opaque; arbitrary bytes must survive untouched.
        let blob = vec![0u8, 159, 146, 150, 255];
        let record = PackRecord::new(PackId::from_raw(2), region(), blob.clone());
        assert_eq!(record.snapshot().context, blob);
    }

    #[test]
    fn test_run_token_fences_stale_runs() {
        let record = PackRecord::new(PackId::from_raw(3), region(), Vec::new());
        let mut inner = record.inner.lock();

        let first = RunToken {
            cancel: CancellationToken::new(),
            seq: 0,
        };
        inner.run = Some(first.clone());
        assert!(first.is_current(&inner));

        let second = RunToken {
            cancel: CancellationToken::new(),
            seq: 1,
        };
        inner.run = Some(second.clone());
        assert!(!first.is_current(&inner));
        assert!(second.is_current(&inner));
    }

    #[test]
    fn test_pack_id_display() {
        assert_eq!(PackId::from_raw(42).to_string(), "pack-42");
    }
}
