//! In-process post store.
//!
//! Backs local runs and tests. Besides the [`PostStore`] contract it lets a
//! caller take the store offline, add latency and cut change feed
//! subscribers, which is how transport failures are exercised.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::application::repos::{ChangeEvent, ChangeStream, PostQuery, PostStore, RepoError};
use crate::domain::entities::PostRecord;
use crate::domain::posts::{NewPost, PostPatch, matches_search, sample_records, sort_for_listing};
use crate::domain::types::ChangeKind;
use crate::util::lock::{rw_read, rw_write};

const SOURCE: &str = "infra::memory";
const CHANGE_BUFFER: usize = 256;

pub struct InMemoryPostStore {
    posts: RwLock<HashMap<Uuid, PostRecord>>,
    changes: broadcast::Sender<ChangeEvent>,
    disconnects: watch::Sender<u64>,
    available: AtomicBool,
    latency_ms: AtomicU64,
    find_calls: AtomicUsize,
}

impl InMemoryPostStore {
    pub fn new() -> Self {
        Self::with_records(Vec::new())
    }

    /// Store seeded with the bundled demo posts.
    pub fn with_sample_posts() -> Self {
        Self::with_records(sample_records(OffsetDateTime::now_utc()))
    }

    pub fn with_records(records: Vec<PostRecord>) -> Self {
        Self::with_change_buffer(records, CHANGE_BUFFER)
    }

    /// `buffer` bounds how far a subscriber may fall behind before it is
    /// cut off as lagged.
    pub fn with_change_buffer(records: Vec<PostRecord>, buffer: usize) -> Self {
        let (changes, _) = broadcast::channel(buffer.max(1));
        let (disconnects, _) = watch::channel(0);
        Self {
            posts: RwLock::new(records.into_iter().map(|post| (post.id, post)).collect()),
            changes,
            disconnects,
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            find_calls: AtomicUsize::new(0),
        }
    }

    /// While unavailable every call, including `subscribe`, fails as unreachable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delay applied before every call.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// End every open change stream with a `SubscriptionLost` error.
    pub fn disconnect_subscribers(&self) {
        self.disconnects.send_modify(|generation| *generation += 1);
    }

    /// Number of `find` calls that reached the data.
    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.changes.receiver_count()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.posts, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn enter(&self, op: &'static str) -> Result<(), RepoError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            debug!(op, "In-memory store offline");
            return Err(RepoError::unavailable("in-memory store is offline"));
        }
        Ok(())
    }

    fn publish(&self, event: ChangeEvent) {
        // No subscribers is fine.
        let _ = self.changes.send(event);
    }
}

impl Default for InMemoryPostStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PostStore for InMemoryPostStore {
    async fn find(&self, query: &PostQuery) -> Result<Vec<PostRecord>, RepoError> {
        self.enter("find").await?;
        self.find_calls.fetch_add(1, Ordering::SeqCst);

        let mut posts: Vec<PostRecord> = rw_read(&self.posts, SOURCE, "find")
            .values()
            .filter(|post| query.status.is_none_or(|status| post.status == status))
            .filter(|post| {
                query
                    .search
                    .as_deref()
                    .is_none_or(|term| matches_search(post, term))
            })
            .cloned()
            .collect();

        sort_for_listing(&mut posts);
        if let Some(limit) = query.limit {
            posts.truncate(limit as usize);
        }
        Ok(posts)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PostRecord>, RepoError> {
        self.enter("find_by_id").await?;
        Ok(rw_read(&self.posts, SOURCE, "find_by_id").get(&id).cloned())
    }

    async fn insert(&self, post: NewPost) -> Result<PostRecord, RepoError> {
        self.enter("insert").await?;
        let now = OffsetDateTime::now_utc();
        let record = post.into_record(Uuid::new_v4(), now, now);

        rw_write(&self.posts, SOURCE, "insert").insert(record.id, record.clone());
        self.publish(ChangeEvent::with_record(ChangeKind::Insert, record.clone()));
        Ok(record)
    }

    async fn update(&self, id: Uuid, patch: &PostPatch) -> Result<PostRecord, RepoError> {
        self.enter("update").await?;
        let record = {
            let mut posts = rw_write(&self.posts, SOURCE, "update");
            let record = posts.get_mut(&id).ok_or(RepoError::NotFound)?;
            patch.apply_to(record);
            let now = OffsetDateTime::now_utc();
            record.updated_at = now.max(record.updated_at + time::Duration::MICROSECOND);
            record.clone()
        };

        self.publish(ChangeEvent::with_record(ChangeKind::Update, record.clone()));
        Ok(record)
    }

    async fn delete(&self, id: Uuid) -> Result<(), RepoError> {
        self.enter("delete").await?;
        let removed = rw_write(&self.posts, SOURCE, "delete").remove(&id);
        if removed.is_none() {
            return Err(RepoError::NotFound);
        }

        self.publish(ChangeEvent::new(ChangeKind::Delete, id));
        Ok(())
    }

    async fn subscribe(&self) -> Result<ChangeStream, RepoError> {
        self.enter("subscribe").await?;

        let mut changes = self.changes.subscribe();
        let mut disconnects = self.disconnects.subscribe();
        disconnects.borrow_and_update();

        let stream = stream! {
            loop {
                let next = tokio::select! {
                    _ = disconnects.changed() => Err(RepoError::SubscriptionLost(
                        "subscriber disconnected".to_string(),
                    )),
                    received = changes.recv() => match received {
                        Ok(event) => Ok(Some(event)),
                        Err(RecvError::Lagged(skipped)) => Err(RepoError::SubscriptionLost(
                            format!("subscriber lagged by {skipped} events"),
                        )),
                        Err(RecvError::Closed) => Ok(None),
                    },
                };
                match next {
                    Ok(Some(event)) => yield Ok(event),
                    Ok(None) => break,
                    Err(err) => {
                        yield Err(err);
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
