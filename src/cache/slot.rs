//! A single cache entry: state channel plus in-flight request sharing.

use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use metrics::{counter, histogram};
use time::OffsetDateTime;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::debug;

use crate::application::error::PostError;
use crate::util::lock::mutex_lock;

use super::keys::CacheKey;
use super::state::CacheState;

const SOURCE: &str = "cache::slot";

pub(crate) const METRIC_CACHE_DEDUP: &str = "postwire_cache_dedup_total";
pub(crate) const METRIC_CACHE_FETCH_MS: &str = "postwire_cache_fetch_ms";

pub(crate) type FetchResult<T> = Result<Arc<T>, PostError>;
pub(crate) type SharedFetch<T> = Shared<BoxFuture<'static, FetchResult<T>>>;

struct SlotInner<T> {
    /// Bumped by every invalidation; a fetch started under an older
    /// generation completes as `Stale`.
    generation: u64,
    inflight: Option<SharedFetch<T>>,
}

pub(crate) struct Slot<T> {
    key: CacheKey,
    state: watch::Sender<CacheState<T>>,
    inner: Mutex<SlotInner<T>>,
}

impl<T> Slot<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn new(key: CacheKey) -> Self {
        let (state, _) = watch::channel(CacheState::Empty);
        Self {
            key,
            state,
            inner: Mutex::new(SlotInner {
                generation: 0,
                inflight: None,
            }),
        }
    }

    pub(crate) fn key(&self) -> CacheKey {
        self.key
    }

    pub(crate) fn current(&self) -> CacheState<T> {
        self.state.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<CacheState<T>> {
        self.state.subscribe()
    }

    pub(crate) fn is_inflight(&self) -> bool {
        mutex_lock(&self.inner, SOURCE, "is_inflight")
            .inflight
            .is_some()
    }

    /// A fetch is running or someone is watching the entry.
    pub(crate) fn is_pinned(&self) -> bool {
        self.is_inflight() || self.state.receiver_count() > 0
    }

    /// Join the running fetch, or start one with `loader`.
    ///
    /// The returned future is shared: every caller observes the same result
    /// and dropping one of them does not cancel the request. When a tokio
    /// runtime is available the fetch is also driven by a spawned task, so it
    /// completes even if every caller goes away.
    pub(crate) fn join_or_start<F>(self: &Arc<Self>, loader: F) -> SharedFetch<T>
    where
        F: FnOnce() -> BoxFuture<'static, Result<T, PostError>>,
    {
        let fetch = {
            let mut inner = mutex_lock(&self.inner, SOURCE, "join_or_start");
            if let Some(existing) = &inner.inflight {
                counter!(METRIC_CACHE_DEDUP, "key" => self.key.kind()).increment(1);
                debug!(key = %self.key, "Joined in-flight fetch");
                return existing.clone();
            }

            let generation = inner.generation;
            let previous = self.state.borrow().data().cloned();
            self.state.send_replace(CacheState::Loading { previous });

            let weak: Weak<Self> = Arc::downgrade(self);
            let key = self.key;
            let load = loader();
            let fetch = async move {
                let started_at = Instant::now();
                let result = load.await.map(Arc::new);
                histogram!(
                    METRIC_CACHE_FETCH_MS,
                    "key" => key.kind(),
                    "result" => if result.is_ok() { "ok" } else { "error" }
                )
                .record(started_at.elapsed().as_secs_f64() * 1000.0);

                if let Some(slot) = weak.upgrade() {
                    slot.complete(generation, &result);
                }
                result
            }
            .boxed()
            .shared();

            inner.inflight = Some(fetch.clone());
            fetch
        };

        if let Ok(handle) = Handle::try_current() {
            handle.spawn(fetch.clone());
        }
        fetch
    }

    fn complete(&self, generation: u64, result: &FetchResult<T>) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "complete");
        inner.inflight = None;
        let superseded = inner.generation != generation;

        let next = match result {
            Ok(data) if !superseded => CacheState::Fresh {
                data: Arc::clone(data),
                fetched_at: OffsetDateTime::now_utc(),
            },
            Ok(data) => match &*self.state.borrow() {
                CacheState::Error { cause, .. } => CacheState::Error {
                    cause: cause.clone(),
                    previous: Some(Arc::clone(data)),
                },
                _ => CacheState::Stale {
                    data: Arc::clone(data),
                },
            },
            Err(cause) => CacheState::Error {
                cause: cause.clone(),
                previous: self.state.borrow().data().cloned(),
            },
        };

        debug!(
            key = %self.key,
            state = next.label(),
            superseded,
            "Cache entry settled"
        );
        self.state.send_replace(next);
    }

    /// Mark the entry stale. Returns `true` when something changed.
    pub(crate) fn invalidate(&self) -> bool {
        let mut inner = mutex_lock(&self.inner, SOURCE, "invalidate");
        inner.generation = inner.generation.wrapping_add(1);
        let next = self.state.borrow().invalidated();
        match next {
            Some(next) => {
                self.state.send_replace(next);
                true
            }
            None => inner.inflight.is_some(),
        }
    }

    pub(crate) fn mark_error(&self, cause: PostError) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "mark_error");
        inner.generation = inner.generation.wrapping_add(1);
        let previous = self.state.borrow().data().cloned();
        self.state
            .send_replace(CacheState::Error { cause, previous });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::oneshot;

    use super::*;

    fn slot() -> Arc<Slot<u32>> {
        Arc::new(Slot::new(CacheKey::PostList))
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_load() {
        let slot = slot();
        let calls = Arc::new(AtomicUsize::new(0));
        let (release, gate) = oneshot::channel::<()>();

        let counted = Arc::clone(&calls);
        let first = slot.join_or_start(move || {
            counted.fetch_add(1, Ordering::SeqCst);
            async move {
                let _ = gate.await;
                Ok(7)
            }
            .boxed()
        });
        let counted = Arc::clone(&calls);
        let second = slot.join_or_start(move || {
            counted.fetch_add(1, Ordering::SeqCst);
            async { Ok(8) }.boxed()
        });

        assert!(slot.current().is_pending());
        let _ = release.send(());

        let (a, b) = tokio::join!(first, second);
        assert_eq!(*a.expect("first"), 7);
        assert_eq!(*b.expect("second"), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(slot.current().is_fresh());
        assert!(!slot.is_inflight());
    }

    #[tokio::test]
    async fn invalidation_during_fetch_settles_stale() {
        let slot = slot();
        let (release, gate) = oneshot::channel::<()>();
        let fetch = slot.join_or_start(move || {
            async move {
                let _ = gate.await;
                Ok(1)
            }
            .boxed()
        });

        assert!(slot.invalidate());
        let _ = release.send(());
        fetch.await.expect("fetch");

        let state = slot.current();
        assert!(state.is_stale(), "got {}", state.label());
        assert_eq!(state.data().map(|d| **d), Some(1));
    }

    #[tokio::test]
    async fn failure_keeps_previous_data() {
        let slot = slot();
        slot.join_or_start(|| async { Ok(3) }.boxed())
            .await
            .expect("first load");
        slot.invalidate();

        let result = slot
            .join_or_start(|| async { Err(PostError::backend_unavailable("down")) }.boxed())
            .await;
        assert!(result.is_err());

        let state = slot.current();
        assert!(state.error().is_some_and(PostError::is_retryable));
        assert_eq!(state.data().map(|d| **d), Some(3));
    }

    #[tokio::test]
    async fn error_mark_survives_late_completion() {
        let slot = slot();
        let (release, gate) = oneshot::channel::<()>();
        let fetch = slot.join_or_start(move || {
            async move {
                let _ = gate.await;
                Ok(5)
            }
            .boxed()
        });

        slot.mark_error(PostError::subscription("gave up"));
        let _ = release.send(());
        fetch.await.expect("fetch");

        let state = slot.current();
        assert!(matches!(
            state.error(),
            Some(PostError::Subscription { .. })
        ));
        assert_eq!(state.data().map(|d| **d), Some(5));
    }

    #[test]
    fn invalidating_empty_entry_is_a_no_op() {
        let slot = slot();
        assert!(!slot.invalidate());
        assert!(matches!(slot.current(), CacheState::Empty));
    }
}
