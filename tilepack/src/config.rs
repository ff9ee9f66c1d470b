//! Download engine configuration.
//!
//! Plain structs with `Default` and `with_*` builders; constants carry the
//! defaults so tests and callers can reference them by name.

use std::time::Duration;

/// Default concurrent fetches per pack.
pub const DEFAULT_FAN_OUT: usize = 6;

/// Default cap on outstanding fetches across all packs.
pub const DEFAULT_GLOBAL_FETCH_LIMIT: usize = 24;

/// Default attempt cap per resource (including the initial attempt).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default initial delay for exponential backoff (100ms).
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 100;

/// Default maximum delay for exponential backoff (30 seconds).
pub const DEFAULT_MAX_BACKOFF_SECS: u64 = 30;

/// Configuration for the download engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Concurrent fetches per pack.
    pub fan_out: usize,

    /// Total outstanding fetches across all packs.
    pub global_fetch_limit: usize,

    /// Attempts per resource before it is recorded as failed.
    pub max_attempts: u32,

    /// Delay after the first transient failure; doubles per attempt.
    pub initial_backoff: Duration,

    /// Ceiling for the backoff delay.
    pub max_backoff: Duration,

    /// Optional maximum number of tiles a pack may download.
    pub max_tiles: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fan_out: DEFAULT_FAN_OUT,
            global_fetch_limit: DEFAULT_GLOBAL_FETCH_LIMIT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_secs(DEFAULT_MAX_BACKOFF_SECS),
            max_tiles: None,
        }
    }
}

impl EngineConfig {
    /// Sets the per-pack fan-out limit (minimum 1).
    pub fn with_fan_out(mut self, fan_out: usize) -> Self {
        self.fan_out = fan_out.max(1);
        self
    }

    /// Sets the process-wide outstanding-fetch limit (minimum 1).
    pub fn with_global_fetch_limit(mut self, limit: usize) -> Self {
        self.global_fetch_limit = limit.max(1);
        self
    }

    /// Sets the attempt cap per resource (minimum 1).
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the initial backoff delay.
    pub fn with_initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff = delay;
        self
    }

    /// Sets the maximum-tiles quota.
    pub fn with_max_tiles(mut self, max_tiles: u64) -> Self {
        self.max_tiles = Some(max_tiles);
        self
    }
}
