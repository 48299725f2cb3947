//! Post cache and invalidation.
//!
//! - **Entries**: the post listing plus an LRU of single posts, each exposing
//!   its [`CacheState`] through a watch channel
//! - **Invalidation**: mutations and change feed entries become
//!   [`CacheEvent`]s, merged by [`ConsumptionPlan`] and applied by
//!   [`CacheConsumer`]
//! - **Realtime**: [`RealtimeBridge`] follows the store's change feed
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! post_limit = 500
//! eager_revalidate = true
//! refetch_max_attempts = 3
//! # ... see config.rs for all options
//! ```

mod config;
mod consumer;
mod events;
mod keys;
mod planner;
mod realtime;
mod slot;
mod state;
mod store;
mod trigger;

pub use config::CacheConfig;
pub use consumer::CacheConsumer;
pub use events::{CacheEvent, Epoch, EventKind, EventQueue};
pub use keys::CacheKey;
pub use planner::ConsumptionPlan;
pub use realtime::{BridgeStatus, RealtimeBridge, RealtimeConfig, SubscriptionHandle};
pub use state::CacheState;
pub use store::PostCache;
pub use trigger::CacheTrigger;

pub(crate) mod metric_names {
    pub(crate) use super::consumer::METRIC_CACHE_CONSUME_MS;
    pub(crate) use super::events::{METRIC_CACHE_EVENT_DROPPED, METRIC_CACHE_EVENT_QUEUE_LEN};
    pub(crate) use super::realtime::METRIC_REALTIME_RECONNECT;
    pub(crate) use super::slot::{METRIC_CACHE_DEDUP, METRIC_CACHE_FETCH_MS};
    pub(crate) use super::store::{
        METRIC_CACHE_EVICT, METRIC_CACHE_HIT, METRIC_CACHE_INVALIDATE, METRIC_CACHE_MISS,
    };
}
