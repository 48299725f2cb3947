//! Cache consumer for executing consumption plans.
//!
//! Drains events from the queue and applies the resulting invalidations.

use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use tracing::{info, instrument};
use uuid::Uuid;

use super::config::CacheConfig;
use super::events::EventQueue;
use super::planner::ConsumptionPlan;
use super::store::PostCache;

pub(crate) const METRIC_CACHE_CONSUME_MS: &str = "postwire_cache_consume_ms";

/// Cache consumer that processes events and maintains cache consistency.
///
/// The consumer:
/// 1. Drains events from the queue
/// 2. Generates a consumption plan from the events
/// 3. Marks the affected entries stale (or failed) in one step
/// 4. Optionally starts background refetches for what went stale
pub struct CacheConsumer {
    config: CacheConfig,
    cache: Arc<PostCache>,
    queue: Arc<EventQueue>,
}

impl CacheConsumer {
    pub fn new(config: CacheConfig, cache: Arc<PostCache>, queue: Arc<EventQueue>) -> Self {
        Self {
            config,
            cache,
            queue,
        }
    }

    /// Consume pending events and execute the plan.
    ///
    /// Returns true if any events were processed.
    #[instrument(skip(self))]
    pub async fn consume(&self) -> bool {
        let consume_started_at = Instant::now();
        let events = self.queue.drain(self.config.consume_batch_limit);
        if events.is_empty() {
            return false;
        }

        let event_count = events.len();
        let event_ids: Vec<Uuid> = events.iter().map(|e| e.id).collect();
        let plan = ConsumptionPlan::from_events(events);

        info!(
            event_count,
            event_ids = ?event_ids,
            plan = %plan,
            "Cache consumption starting"
        );

        self.cache.apply(&plan);

        let revalidate = self.config.eager_revalidate && plan.fail_list.is_none();
        if revalidate {
            self.cache.revalidate_stale();
        }

        info!(
            event_count,
            stale_posts = plan.stale_posts.len(),
            stale_all = plan.stale_all,
            revalidate,
            "Cache consumption complete"
        );

        histogram!(
            METRIC_CACHE_CONSUME_MS,
            "mode" => if revalidate { "revalidate" } else { "invalidate_only" }
        )
        .record(consume_started_at.elapsed().as_secs_f64() * 1000.0);

        true
    }

    pub fn cache(&self) -> &Arc<PostCache> {
        &self.cache
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }
}
