//! Post cache: the listing entry plus an LRU of per-post entries.

use std::future::Future;
use std::sync::{Arc, Mutex, Weak};

use futures::FutureExt;
use futures::future::BoxFuture;
use lru::LruCache;
use metrics::counter;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::error::PostError;
use crate::application::posts::PostService;
use crate::domain::entities::PostRecord;
use crate::util::backoff::BackoffPolicy;
use crate::util::lock::mutex_lock;

use super::config::CacheConfig;
use super::keys::CacheKey;
use super::planner::ConsumptionPlan;
use super::slot::{FetchResult, Slot};
use super::state::CacheState;

const SOURCE: &str = "cache::store";

pub(crate) const METRIC_CACHE_HIT: &str = "postwire_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS: &str = "postwire_cache_miss_total";
pub(crate) const METRIC_CACHE_INVALIDATE: &str = "postwire_cache_invalidate_total";
pub(crate) const METRIC_CACHE_EVICT: &str = "postwire_cache_evict_total";

/// Rounds a background revalidation runs while invalidations keep landing.
const MAX_REVALIDATE_ROUNDS: u32 = 4;

type PostSlot = Arc<Slot<PostRecord>>;
type ListSlot = Arc<Slot<Vec<PostRecord>>>;

/// Process-wide cache of posts read through [`PostService`].
///
/// Reads never block on the store: [`PostCache::list_state`] and
/// [`PostCache::post_state`] return whatever is cached and start a
/// background refetch when the entry is empty or stale. Fetches for the same
/// key are shared by all callers.
pub struct PostCache {
    config: CacheConfig,
    service: PostService,
    list: ListSlot,
    posts: Mutex<LruCache<Uuid, PostSlot>>,
    this: Weak<PostCache>,
}

impl PostCache {
    /// `service` should not carry a cache trigger; the cache only reads.
    pub fn new(config: CacheConfig, service: PostService) -> Arc<Self> {
        let posts = Mutex::new(LruCache::new(config.post_limit_non_zero()));
        Arc::new_cyclic(|this| Self {
            config,
            service,
            list: Arc::new(Slot::new(CacheKey::PostList)),
            posts,
            this: this.clone(),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // ---------------------------------------------------------------------
    // Listing
    // ---------------------------------------------------------------------

    /// Current listing state; starts a refetch when empty or stale.
    pub fn list_state(&self) -> CacheState<Vec<PostRecord>> {
        let snapshot = self.list.current();
        record_lookup(CacheKey::PostList, snapshot.data().is_some(), snapshot.label());
        match snapshot {
            CacheState::Empty => {
                self.revalidate_list_in_background();
                self.list.current()
            }
            CacheState::Stale { .. } => {
                self.revalidate_list_in_background();
                snapshot
            }
            other => other,
        }
    }

    pub fn subscribe_list(&self) -> watch::Receiver<CacheState<Vec<PostRecord>>> {
        self.list.subscribe()
    }

    /// Fresh listing, awaiting the store when the cached copy is not fresh.
    pub async fn fetch_list(&self) -> FetchResult<Vec<PostRecord>> {
        let snapshot = self.list.current();
        record_lookup(CacheKey::PostList, snapshot.is_fresh(), snapshot.label());
        if let CacheState::Fresh { data, .. } = snapshot {
            return Ok(data);
        }
        let service = self.service.clone();
        let result = self
            .list
            .join_or_start(move || async move { service.list_posts().await }.boxed())
            .await;
        self.reschedule_superseded_list();
        result
    }

    /// Force a refetch regardless of the current state, e.g. from a
    /// "refresh" action after the change feed failed.
    pub async fn refresh_list(&self) -> FetchResult<Vec<PostRecord>> {
        self.invalidate_list();
        let service = self.service.clone();
        let result = self
            .list
            .join_or_start(move || async move { service.list_posts().await }.boxed())
            .await;
        self.reschedule_superseded_list();
        result
    }

    /// A fetch invalidated while in flight lands as `Stale`; refetch it.
    fn reschedule_superseded_list(&self) {
        if self.list.current().is_stale() {
            self.revalidate_list_in_background();
        }
    }

    pub fn invalidate_list(&self) {
        if self.list.invalidate() {
            counter!(METRIC_CACHE_INVALIDATE, "key" => CacheKey::PostList.kind()).increment(1);
        }
    }

    pub fn mark_list_error(&self, cause: PostError) {
        warn!(error = %cause, "Post listing marked as failed");
        self.list.mark_error(cause);
    }

    // ---------------------------------------------------------------------
    // Single posts
    // ---------------------------------------------------------------------

    /// Current state of one post; starts a refetch when empty or stale.
    pub fn post_state(&self, id: Uuid) -> CacheState<PostRecord> {
        let slot = self.post_slot(id);
        let snapshot = slot.current();
        record_lookup(slot.key(), snapshot.data().is_some(), snapshot.label());
        match snapshot {
            CacheState::Empty => {
                self.revalidate_post_in_background(&slot);
                slot.current()
            }
            CacheState::Stale { .. } => {
                self.revalidate_post_in_background(&slot);
                snapshot
            }
            other => other,
        }
    }

    pub fn subscribe_post(&self, id: Uuid) -> watch::Receiver<CacheState<PostRecord>> {
        self.post_slot(id).subscribe()
    }

    /// Fresh copy of one post. A `NotFound` answer evicts the entry.
    pub async fn fetch_post(&self, id: Uuid) -> FetchResult<PostRecord> {
        let slot = self.post_slot(id);
        let snapshot = slot.current();
        record_lookup(slot.key(), snapshot.is_fresh(), snapshot.label());
        if let CacheState::Fresh { data, .. } = snapshot {
            return Ok(data);
        }
        let service = self.service.clone();
        let result = slot
            .join_or_start(move || async move { service.get_post(id).await }.boxed())
            .await;
        if matches!(result, Err(PostError::NotFound { .. })) {
            self.evict_post(id);
        } else if slot.current().is_stale() {
            self.revalidate_post_in_background(&slot);
        }
        result
    }

    pub fn invalidate_post(&self, id: Uuid) {
        let slot = mutex_lock(&self.posts, SOURCE, "invalidate_post")
            .peek(&id)
            .cloned();
        if let Some(slot) = slot {
            invalidate_slot(&slot);
        }
    }

    /// Whether `id` currently has an entry.
    pub fn contains_post(&self, id: Uuid) -> bool {
        mutex_lock(&self.posts, SOURCE, "contains_post").contains(&id)
    }

    pub fn cached_post_count(&self) -> usize {
        mutex_lock(&self.posts, SOURCE, "cached_post_count").len()
    }

    fn post_slot(&self, id: Uuid) -> PostSlot {
        let mut posts = mutex_lock(&self.posts, SOURCE, "post_slot");
        if let Some(slot) = posts.get(&id) {
            return Arc::clone(slot);
        }
        if posts.len() >= posts.cap().get() {
            rotate_pinned_slots(&mut posts);
        }
        let slot = Arc::new(Slot::new(CacheKey::Post(id)));
        if let Some((evicted, _)) = posts.push(id, Arc::clone(&slot)) {
            if evicted != id {
                counter!(METRIC_CACHE_EVICT, "reason" => "capacity").increment(1);
            }
        }
        slot
    }

    fn evict_post(&self, id: Uuid) {
        let mut posts = mutex_lock(&self.posts, SOURCE, "evict_post");
        // A newer fetch for the same id owns the entry now.
        if posts.peek(&id).is_some_and(|slot| slot.is_inflight()) {
            return;
        }
        let removed = posts.pop(&id);
        if removed.is_some() {
            counter!(METRIC_CACHE_EVICT, "reason" => "not_found").increment(1);
            debug!(post_id = %id, "Evicted missing post from cache");
        }
    }

    // ---------------------------------------------------------------------
    // Invalidation plans
    // ---------------------------------------------------------------------

    pub fn invalidate_all(&self) {
        self.apply(&ConsumptionPlan {
            stale_all: true,
            stale_list: true,
            ..Default::default()
        });
    }

    /// Apply a plan atomically with respect to other plans.
    pub fn apply(&self, plan: &ConsumptionPlan) {
        let posts = mutex_lock(&self.posts, SOURCE, "apply");

        if plan.stale_list || plan.stale_all {
            self.invalidate_list();
        }

        if plan.stale_all {
            for (_, slot) in posts.iter() {
                invalidate_slot(slot);
            }
        } else {
            for id in &plan.stale_posts {
                if let Some(slot) = posts.peek(id) {
                    invalidate_slot(slot);
                }
            }
        }

        if let Some(message) = &plan.fail_list {
            self.mark_list_error(PostError::subscription(message.clone()));
        }

        info!(plan = %plan, cached_posts = posts.len(), "Cache plan applied");
    }

    /// Refetch every stale entry in the background.
    pub fn revalidate_stale(&self) {
        if self.list.current().is_stale() {
            self.revalidate_list_in_background();
        }
        let stale: Vec<PostSlot> = mutex_lock(&self.posts, SOURCE, "revalidate_stale")
            .iter()
            .filter(|(_, slot)| slot.current().is_stale())
            .map(|(_, slot)| Arc::clone(slot))
            .collect();
        for slot in stale {
            self.revalidate_post_in_background(&slot);
        }
    }

    fn revalidate_list_in_background(&self) {
        let Ok(handle) = Handle::try_current() else {
            debug!("No runtime; listing revalidation deferred to next fetch");
            return;
        };
        if self.list.is_inflight() {
            return;
        }

        let slot = Arc::clone(&self.list);
        let service = self.service.clone();
        let attempts = self.config.refetch_attempts();
        let backoff = self.config.refetch_backoff();
        let loader = move |service: PostService| {
            retrying_loader(CacheKey::PostList, attempts, backoff, move || {
                let service = service.clone();
                async move { service.list_posts().await }
            })
        };

        // Started before spawning so the caller already observes `Loading`.
        let first = slot.join_or_start(loader(service.clone()));

        handle.spawn(async move {
            let _ = first.await;
            for _ in 1..MAX_REVALIDATE_ROUNDS {
                if !slot.current().is_stale() {
                    break;
                }
                let _ = slot.join_or_start(loader(service.clone())).await;
            }
        });
    }

    fn revalidate_post_in_background(&self, slot: &PostSlot) {
        let Ok(handle) = Handle::try_current() else {
            return;
        };
        if slot.is_inflight() {
            return;
        }
        let CacheKey::Post(id) = slot.key() else {
            return;
        };

        let slot = Arc::clone(slot);
        let service = self.service.clone();
        let cache = self.this.clone();
        let attempts = self.config.refetch_attempts();
        let backoff = self.config.refetch_backoff();
        let loader = move |service: PostService| {
            retrying_loader(CacheKey::Post(id), attempts, backoff, move || {
                let service = service.clone();
                async move { service.get_post(id).await }
            })
        };

        let first = slot.join_or_start(loader(service.clone()));

        handle.spawn(async move {
            let mut result = first.await;
            for _ in 1..MAX_REVALIDATE_ROUNDS {
                if !slot.current().is_stale() {
                    break;
                }
                result = slot.join_or_start(loader(service.clone())).await;
            }
            if matches!(result, Err(PostError::NotFound { .. })) {
                if let Some(cache) = cache.upgrade() {
                    cache.evict_post(id);
                }
            }
        });
    }
}

/// Move entries with a running fetch or live subscribers away from the
/// eviction end. When every entry is pinned the oldest one goes anyway.
fn rotate_pinned_slots(posts: &mut LruCache<Uuid, PostSlot>) {
    for _ in 0..posts.len() {
        let pinned = match posts.peek_lru() {
            Some((id, slot)) if slot.is_pinned() => *id,
            _ => return,
        };
        posts.promote(&pinned);
    }
}

fn invalidate_slot<T: Send + Sync + 'static>(slot: &Slot<T>) {
    if slot.invalidate() {
        counter!(METRIC_CACHE_INVALIDATE, "key" => slot.key().kind()).increment(1);
    }
}

/// A hit is any answer served from the entry without waiting on the store.
fn record_lookup(key: CacheKey, hit: bool, state: &'static str) {
    let metric = if hit { METRIC_CACHE_HIT } else { METRIC_CACHE_MISS };
    counter!(metric, "key" => key.kind(), "state" => state).increment(1);
}

/// Wrap `op` so transport failures are retried with backoff.
///
/// Validation and not-found answers are returned at once.
fn retrying_loader<T, F, Fut>(
    key: CacheKey,
    attempts: u32,
    backoff: BackoffPolicy,
    op: F,
) -> impl FnOnce() -> BoxFuture<'static, Result<T, PostError>>
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, PostError>> + Send + 'static,
{
    move || {
        async move {
            let mut attempt = 0;
            loop {
                match op().await {
                    Ok(value) => return Ok(value),
                    Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                        let delay = backoff.delay(attempt);
                        warn!(
                            key = %key,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Background refetch failed; retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        .boxed()
    }
}
