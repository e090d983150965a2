//! Engine configuration.

use quillwire_crypto::DEFAULT_BUCKET_SIZE;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Default bound on how far a single message may jump the receive counter
pub const DEFAULT_MAX_SKIP: u32 = 50;

/// Default capacity of each session's skipped-key cache
pub const DEFAULT_MAX_CACHED_KEYS: usize = 1000;

/// Limits and sizes injected into every [`crate::SessionStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum `count - count_recv` accepted for one incoming message
    pub max_skip: u32,
    /// Maximum skipped keys cached per session; the lowest counter is
    /// evicted on overflow
    pub max_cached_keys: usize,
    /// Padding bucket in bytes
    pub bucket_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_skip: DEFAULT_MAX_SKIP,
            max_cached_keys: DEFAULT_MAX_CACHED_KEYS,
            bucket_size: DEFAULT_BUCKET_SIZE,
        }
    }
}

impl EngineConfig {
    /// Reject configurations the engine cannot operate with.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.bucket_size == 0 {
            return Err(EngineError::InvalidConfig { reason: "bucket_size must be non-zero" });
        }
        if self.max_cached_keys < self.max_skip as usize {
            return Err(EngineError::InvalidConfig {
                reason: "max_cached_keys must be at least max_skip",
            });
        }
        Ok(())
    }
}
