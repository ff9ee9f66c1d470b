//! Crate-level error type for pack management operations.

use thiserror::Error;

use crate::coord::CoordError;
use crate::manager::PackId;
use crate::resource::FetchError;
use crate::store::StoreError;

/// Errors returned by [`PackManager`](crate::manager::PackManager) operations.
#[derive(Debug, Error)]
pub enum PackError {
    /// The pack id does not name a live pack. Removed packs fail this way
    /// permanently; their ids are never reused.
    #[error("no such pack: {0}")]
    PackNotFound(PackId),

    /// The resource store rejected the operation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The region or coordinate input was invalid.
    #[error(transparent)]
    Coord(#[from] CoordError),

    /// A network fetch failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),
}
