//! Cache configuration.
//!
//! Controls the post cache and its background revalidation via `postwire.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

use crate::util::backoff::BackoffPolicy;

const DEFAULT_POST_LIMIT: usize = 500;
const DEFAULT_CONSUME_BATCH_LIMIT: usize = 100;
const DEFAULT_EVENT_QUEUE_LIMIT: usize = 1024;
const DEFAULT_REFETCH_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_REFETCH_BACKOFF_BASE_MS: u64 = 250;
const DEFAULT_REFETCH_BACKOFF_CAP_MS: u64 = 5_000;

/// Cache configuration from `postwire.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable invalidation events. When off, mutations never mark entries stale.
    pub enabled: bool,
    /// Maximum individually cached posts (LRU).
    pub post_limit: usize,
    /// Maximum events per consumption batch.
    pub consume_batch_limit: usize,
    /// Pending events kept before the queue collapses into a full resync.
    pub event_queue_limit: usize,
    /// Refetch stale entries right after invalidation instead of on next read.
    pub eager_revalidate: bool,
    /// Attempts per background refetch before the entry turns into an error.
    pub refetch_max_attempts: u32,
    pub refetch_backoff_base_ms: u64,
    pub refetch_backoff_cap_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            post_limit: DEFAULT_POST_LIMIT,
            consume_batch_limit: DEFAULT_CONSUME_BATCH_LIMIT,
            event_queue_limit: DEFAULT_EVENT_QUEUE_LIMIT,
            eager_revalidate: true,
            refetch_max_attempts: DEFAULT_REFETCH_MAX_ATTEMPTS,
            refetch_backoff_base_ms: DEFAULT_REFETCH_BACKOFF_BASE_MS,
            refetch_backoff_cap_ms: DEFAULT_REFETCH_BACKOFF_CAP_MS,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            post_limit: settings.post_limit,
            consume_batch_limit: settings.consume_batch_limit,
            event_queue_limit: settings.event_queue_limit,
            eager_revalidate: settings.eager_revalidate,
            refetch_max_attempts: settings.refetch_max_attempts,
            refetch_backoff_base_ms: settings.refetch_backoff_base_ms,
            refetch_backoff_cap_ms: settings.refetch_backoff_cap_ms,
        }
    }
}

impl CacheConfig {
    /// Returns the post limit as NonZeroUsize, clamping to 1 if zero.
    pub fn post_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.post_limit).unwrap_or(NonZeroUsize::MIN)
    }

    /// At least one attempt is always made.
    pub fn refetch_attempts(&self) -> u32 {
        self.refetch_max_attempts.max(1)
    }

    pub fn refetch_backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.refetch_backoff_base_ms),
            cap: Duration::from_millis(self.refetch_backoff_cap_ms.max(self.refetch_backoff_base_ms)),
            jitter: 0.2,
        }
    }
}
