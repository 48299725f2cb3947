//! Cache event system.
//!
//! Defines cache events and an in-memory queue for event-driven invalidation.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, gauge};
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::util::lock::mutex_lock;

const SOURCE: &str = "cache::events";

pub(crate) const METRIC_CACHE_EVENT_DROPPED: &str = "postwire_cache_event_dropped_total";
pub(crate) const METRIC_CACHE_EVENT_QUEUE_LEN: &str = "postwire_cache_event_queue_len";

/// Monotonic epoch for ordering events.
///
/// Used to determine which event is "latest" when merging multiple events
/// for the same entity.
pub type Epoch = u64;

/// Cache event with idempotency and ordering support.
#[derive(Debug, Clone)]
pub struct CacheEvent {
    /// Unique identifier for idempotency (UUIDv4).
    pub id: Uuid,
    /// Monotonic epoch for ordering within this process.
    pub epoch: Epoch,
    pub kind: EventKind,
    pub timestamp: OffsetDateTime,
}

impl CacheEvent {
    pub fn new(kind: EventKind, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            kind,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// Why cache entries must be revisited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A post was created or updated, locally or through the change feed.
    PostUpserted { post_id: Uuid },
    /// A post was deleted.
    PostDeleted { post_id: Uuid },
    /// The change feed reconnected; anything may have been missed.
    FeedResynced,
    /// The change feed gave up; readers must refresh by hand.
    FeedFailed { message: String },
}

/// In-memory event queue for cache invalidation.
///
/// Past `limit` pending events the queue collapses into a single
/// [`EventKind::FeedResynced`], which covers everything it replaced.
pub struct EventQueue {
    queue: Mutex<VecDeque<CacheEvent>>,
    epoch_counter: AtomicU64,
    limit: usize,
}

impl EventQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            epoch_counter: AtomicU64::new(0),
            limit: limit.max(1),
        }
    }

    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Publish an event to the queue.
    pub fn publish(&self, kind: EventKind) {
        let epoch = self.next_epoch();
        let event = CacheEvent::new(kind, epoch);

        info!(
            event_id = %event.id,
            event_epoch = event.epoch,
            event_kind = ?event.kind,
            "Cache event enqueued"
        );

        let mut queue = mutex_lock(&self.queue, SOURCE, "publish");
        queue.push_back(event);
        if queue.len() > self.limit {
            let dropped = queue.len();
            // A failure notice must outlive the collapse.
            let failure = queue
                .iter()
                .rev()
                .find(|e| matches!(e.kind, EventKind::FeedFailed { .. }))
                .cloned();
            queue.clear();
            queue.push_back(CacheEvent::new(EventKind::FeedResynced, self.next_epoch()));
            if let Some(failure) = failure {
                queue.push_back(failure);
            }
            counter!(METRIC_CACHE_EVENT_DROPPED).increment(dropped as u64);
            warn!(
                dropped,
                limit = self.limit,
                "Cache event queue overflowed; collapsed into full resync"
            );
        }
        gauge!(METRIC_CACHE_EVENT_QUEUE_LEN).set(queue.len() as f64);
    }

    /// Drain up to `limit` events in FIFO order.
    pub fn drain(&self, limit: usize) -> Vec<CacheEvent> {
        let mut queue = mutex_lock(&self.queue, SOURCE, "drain");
        let count = limit.min(queue.len());
        let events: Vec<CacheEvent> = queue.drain(..count).collect();
        gauge!(METRIC_CACHE_EVENT_QUEUE_LEN).set(queue.len() as f64);
        events
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        mutex_lock(&self.queue, SOURCE, "clear").clear();
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(crate::cache::CacheConfig::default().event_queue_limit)
    }
}
