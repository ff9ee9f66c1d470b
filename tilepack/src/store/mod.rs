//! Durable storage for pack resources and the ambient cache.
//!
//! [`PackStore`] holds every pack-referenced resource exactly once, reference
//! counted across packs. [`AmbientCache`] is the separate, bulk-clearable
//! cache for incidentally fetched resources; its key space never overlaps
//! with pack-referenced keys.

mod ambient;
mod pack_store;

pub use ambient::AmbientCache;
pub use pack_store::{PackStore, StoreError, StoredResource};
