//! Consumption plan generation.
//!
//! Merges multiple cache events into a single set of invalidations.

use std::collections::HashSet;
use std::fmt;

use tracing::trace;
use uuid::Uuid;

use super::events::{CacheEvent, EventKind};

/// Actions to execute for cache consistency.
///
/// Change payloads are never merged into cached data; every touched entry is
/// only marked stale and refetched from the store.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ConsumptionPlan {
    /// Mark the post listing stale.
    pub stale_list: bool,
    /// Individual posts to mark stale.
    pub stale_posts: HashSet<Uuid>,
    /// Mark every entry stale (after a feed reconnect).
    pub stale_all: bool,
    /// Move the listing into an error state carrying this message.
    pub fail_list: Option<String>,
}

impl fmt::Display for ConsumptionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConsumptionPlan {{ stale_list: {}, stale_posts: {}, stale_all: {}, fail_list: {} }}",
            self.stale_list,
            self.stale_posts.len(),
            self.stale_all,
            self.fail_list.is_some(),
        )
    }
}

impl ConsumptionPlan {
    /// Merge multiple events into a plan.
    ///
    /// Events are deduplicated by ID. Upserts and deletes of the same post
    /// collapse into one invalidation of that post and the listing.
    pub fn from_events(events: Vec<CacheEvent>) -> Self {
        let mut plan = Self::default();
        let mut seen_ids = HashSet::new();

        for event in events.into_iter().filter(|e| seen_ids.insert(e.id)) {
            match &event.kind {
                EventKind::PostUpserted { post_id } | EventKind::PostDeleted { post_id } => {
                    if plan.stale_posts.insert(*post_id) {
                        trace!(%post_id, kind = ?event.kind, "Planned post invalidation");
                    }
                    plan.stale_list = true;
                }
                EventKind::FeedResynced => plan.stale_all = true,
                EventKind::FeedFailed { message } => plan.fail_list = Some(message.clone()),
            }
        }

        if plan.stale_all {
            plan.stale_list = true;
        }

        plan
    }

    pub fn is_empty(&self) -> bool {
        !self.stale_list && !self.stale_all && self.stale_posts.is_empty() && self.fail_list.is_none()
    }
}
