//! Provider trait and fetch result types.

use thiserror::Error;

use super::key::ResourceKey;

/// Boxed future for dyn-compatible async methods.
pub use futures::future::BoxFuture;

/// Errors a provider can surface for a single fetch.
///
/// The retry loop only re-attempts transient failures; everything else is
/// recorded as a permanent failure for the resource.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The resource does not exist upstream.
    #[error("resource not found")]
    NotFound,

    /// The request timed out.
    #[error("request timed out")]
    Timeout,

    /// Upstream answered with an error status.
    #[error("server returned status {status}")]
    Server {
        /// HTTP status code.
        status: u16,
    },

    /// The response was permanently malformed.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Connection-level failure (DNS, reset, broken transfer).
    #[error("transport error: {0}")]
    Transport(String),
}

impl FetchError {
    /// Whether the failure is worth retrying.
    ///
    /// Timeouts, transport errors, and 5xx responses are transient; missing
    /// resources, client errors, and malformed payloads are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Server { status } => *status >= 500,
            Self::NotFound | Self::Malformed(_) => false,
        }
    }
}

/// Bytes fetched for a resource, plus the upstream caching directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResource {
    /// The raw payload.
    pub bytes: Vec<u8>,
    /// True when upstream demands revalidation before reuse
    /// (`Cache-Control: no-cache`, `no-store`, or `max-age=0`).
    ///
    /// The reference endpoints disable caching entirely; the core tolerates
    /// that by treating freshly fetched bytes as validated regardless.
    pub must_revalidate: bool,
}

impl FetchedResource {
    /// A resource that may be cached indefinitely.
    pub fn cacheable(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            must_revalidate: false,
        }
    }
}

/// Capability to fetch resource bytes by key.
///
/// This is the entire boundary between the core and the upstream resource
/// server. Implementations must be `Send + Sync`; the engine calls `fetch`
/// from many tasks concurrently. `Pin<Box<dyn Future>>` keeps the trait
/// dyn-compatible so the engine can hold an `Arc<dyn ResourceProvider>`.
pub trait ResourceProvider: Send + Sync {
    /// Fetches the bytes for one resource.
    fn fetch(&self, key: &ResourceKey) -> BoxFuture<'_, Result<FetchedResource, FetchError>>;
}
