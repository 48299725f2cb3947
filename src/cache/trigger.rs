//! Cache trigger service.
//!
//! Provides a high-level API for publishing cache events and optionally
//! consuming them immediately.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::application::repos::ChangeEvent;
use crate::domain::types::ChangeKind;

use super::config::CacheConfig;
use super::consumer::CacheConsumer;
use super::events::{EventKind, EventQueue};

/// Cache trigger for publishing cache events.
///
/// Wraps the event queue and consumer. Local mutations and the change feed
/// both go through here, so a session sees its own writes before the feed
/// echoes them back.
///
/// # Usage
///
/// ```ignore
/// // After a successful post update:
/// trigger.post_upserted(post.id).await;
/// ```
pub struct CacheTrigger {
    config: CacheConfig,
    queue: Arc<EventQueue>,
    consumer: Arc<CacheConsumer>,
}

impl CacheTrigger {
    pub fn new(config: CacheConfig, queue: Arc<EventQueue>, consumer: Arc<CacheConsumer>) -> Self {
        Self {
            config,
            queue,
            consumer,
        }
    }

    /// Publish an event and optionally consume immediately.
    ///
    /// If `consume_now` is false, events wait for the next explicit
    /// consumption.
    pub async fn trigger(&self, kind: EventKind, consume_now: bool) {
        if !self.config.enabled {
            debug!(event_kind = ?kind, "Cache trigger skipped: cache disabled");
            return;
        }

        self.queue.publish(kind);

        if consume_now {
            self.consumer.consume().await;
        }
    }

    /// A post was created or updated.
    pub async fn post_upserted(&self, post_id: Uuid) {
        self.trigger(EventKind::PostUpserted { post_id }, true).await;
    }

    pub async fn post_deleted(&self, post_id: Uuid) {
        self.trigger(EventKind::PostDeleted { post_id }, true).await;
    }

    /// Route one change feed entry. Payloads are ignored; the entry is refetched.
    pub async fn change_received(&self, event: &ChangeEvent) {
        let post_id = event.id;
        let kind = match event.kind {
            ChangeKind::Insert | ChangeKind::Update => EventKind::PostUpserted { post_id },
            ChangeKind::Delete => EventKind::PostDeleted { post_id },
        };
        self.trigger(kind, true).await;
    }

    /// The change feed reconnected; every entry may be behind.
    pub async fn feed_resynced(&self) {
        self.trigger(EventKind::FeedResynced, true).await;
    }

    /// The change feed gave up retrying.
    ///
    /// Published even when invalidation is disabled: readers must learn that
    /// the listing will no longer update by itself.
    pub async fn feed_failed(&self, message: impl Into<String>) {
        self.queue.publish(EventKind::FeedFailed {
            message: message.into(),
        });
        self.consumer.consume().await;
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn consumer(&self) -> &Arc<CacheConsumer> {
        &self.consumer
    }
}
