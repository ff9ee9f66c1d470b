//! CLI error type.

use thiserror::Error;

/// Errors surfaced to the terminal with a non-zero exit code.
#[derive(Debug, Error)]
pub enum CliError {
    /// The region arguments did not form a valid region.
    #[error("invalid region: {0}")]
    Region(#[from] tilepack::coord::CoordError),

    /// The HTTP provider could not be constructed.
    #[error("provider setup failed: {0}")]
    Provider(#[from] tilepack::resource::FetchError),

    /// A pack operation failed.
    #[error("pack operation failed: {0}")]
    Pack(#[from] tilepack::PackError),

    /// The download stalled without completing or erroring.
    #[error("download stalled: no progress for {0} seconds")]
    Stalled(u64),
}
