//! Key/value store for pack-owned resources.
//!
//! One entry per resource key, shared across packs via reference counting.
//! All mutations for a given key run under that key's map entry, so two packs
//! writing the same resource never produce a torn or lost update, and a
//! reader never observes a partially written payload.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use thiserror::Error;

use crate::resource::ResourceKey;

/// Errors from the pack store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The underlying medium is gone. Fatal to in-flight downloads for the
    /// affected pack, not to the process; `reset` reinitializes the store.
    #[error("store unavailable")]
    Unavailable,
}

/// A stored resource as seen by readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResource {
    /// The cached payload.
    pub bytes: Vec<u8>,
    /// When the payload was fetched.
    pub fetched_at: SystemTime,
    /// False after invalidation: the bytes are still served but must be
    /// revalidated before a rendering consumer relies on them.
    pub valid: bool,
    /// Number of packs currently referencing this entry.
    pub refs: u32,
}

#[derive(Debug)]
struct Entry {
    bytes: Vec<u8>,
    fetched_at: SystemTime,
    valid: bool,
    refs: u32,
}

/// Single-writer key/value store mapping resource keys to cached bytes.
#[derive(Debug, Default)]
pub struct PackStore {
    entries: DashMap<String, Entry>,
    closed: AtomicBool,
}

impl PackStore {
    /// Creates an empty, open store.
    pub fn new() -> Self {
        Self::default()
    }

    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            Err(StoreError::Unavailable)
        } else {
            Ok(())
        }
    }

    /// Stores bytes for a key, marking it valid. Reference counts are
    /// untouched; use this to revalidate a key a pack already references.
    pub fn put(&self, key: &ResourceKey, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.check_open()?;
        let now = SystemTime::now();
        match self.entries.entry(key.cache_key()) {
            MapEntry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.bytes = bytes;
                entry.fetched_at = now;
                entry.valid = true;
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry {
                    bytes,
                    fetched_at: now,
                    valid: true,
                    refs: 0,
                });
            }
        }
        Ok(())
    }

    /// Stores bytes for a key and takes one new reference on it, in a single
    /// per-key critical section. Used when a pack stores a key it did not
    /// reference before.
    pub fn put_referenced(&self, key: &ResourceKey, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.check_open()?;
        let now = SystemTime::now();
        match self.entries.entry(key.cache_key()) {
            MapEntry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.bytes = bytes;
                entry.fetched_at = now;
                entry.valid = true;
                entry.refs += 1;
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry {
                    bytes,
                    fetched_at: now,
                    valid: true,
                    refs: 1,
                });
            }
        }
        Ok(())
    }

    /// Takes one additional reference on an existing key.
    ///
    /// Returns `false` if the key is not stored; the caller should fetch and
    /// use [`put_referenced`](Self::put_referenced) instead.
    pub fn retain(&self, key: &ResourceKey) -> Result<bool, StoreError> {
        self.check_open()?;
        match self.entries.get_mut(&key.cache_key()) {
            Some(mut entry) => {
                entry.refs += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drops one reference; the entry is physically deleted when no pack
    /// references it any longer. No-op for unknown keys.
    pub fn release(&self, key: &ResourceKey) -> Result<(), StoreError> {
        self.check_open()?;
        let cache_key = key.cache_key();
        if let MapEntry::Occupied(mut occupied) = self.entries.entry(cache_key) {
            let entry = occupied.get_mut();
            entry.refs = entry.refs.saturating_sub(1);
            if entry.refs == 0 {
                occupied.remove();
            }
        }
        Ok(())
    }

    /// Reads a stored resource. Invalid entries are still returned; the
    /// validity flag tells the consumer to revalidate before relying on them.
    pub fn get(&self, key: &ResourceKey) -> Result<Option<StoredResource>, StoreError> {
        self.check_open()?;
        Ok(self.entries.get(&key.cache_key()).map(|entry| StoredResource {
            bytes: entry.bytes.clone(),
            fetched_at: entry.fetched_at,
            valid: entry.valid,
            refs: entry.refs,
        }))
    }

    /// Whether the key is stored and currently valid.
    pub fn contains_valid(&self, key: &ResourceKey) -> Result<bool, StoreError> {
        self.check_open()?;
        Ok(self
            .entries
            .get(&key.cache_key())
            .map(|entry| entry.valid)
            .unwrap_or(false))
    }

    /// Clears the validity flag. The bytes stay; a concurrent reader still
    /// gets the previous payload.
    pub fn mark_invalid(&self, key: &ResourceKey) -> Result<(), StoreError> {
        self.check_open()?;
        if let Some(mut entry) = self.entries.get_mut(&key.cache_key()) {
            entry.valid = false;
        }
        Ok(())
    }

    /// Deletes an entry outright regardless of references. No-op if absent.
    pub fn delete(&self, key: &ResourceKey) -> Result<(), StoreError> {
        self.check_open()?;
        self.entries.remove(&key.cache_key());
        Ok(())
    }

    /// Number of stored resources.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Takes the store offline: every subsequent operation fails with
    /// [`StoreError::Unavailable`] until `reset` runs.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Tears down and reinitializes the store. Afterwards it is
    /// indistinguishable from a freshly created empty store.
    pub fn reset(&self) {
        self.entries.clear();
        self.closed.store(false, Ordering::Release);
    }
}
