//! Stale-while-revalidate, request sharing and invalidation ordering of the
//! post cache, driven through the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use postwire::application::error::PostError;
use postwire::application::posts::{PostService, PostServiceConfig};
use postwire::application::repos::PostStore;
use postwire::application::session::AdminAuthorizer;
use postwire::cache::{
    CacheConfig, CacheConsumer, CacheState, CacheTrigger, EventKind, EventQueue, PostCache,
};
use postwire::domain::entities::PostRecord;
use postwire::domain::posts::{PostDraft, PostPatch};
use postwire::infra::memory::InMemoryPostStore;
use tokio::sync::watch;
use tokio::time::timeout;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(5);

fn cache_over(store: &Arc<InMemoryPostStore>, config: CacheConfig) -> Arc<PostCache> {
    PostCache::new(
        config,
        PostService::new(store.clone(), PostServiceConfig::default()),
    )
}

async fn wait_until<T, F>(receiver: &mut watch::Receiver<CacheState<T>>, predicate: F) -> CacheState<T>
where
    F: FnMut(&CacheState<T>) -> bool,
{
    timeout(WAIT, receiver.wait_for(predicate))
        .await
        .expect("state change should arrive in time")
        .expect("cache entry dropped")
        .clone()
}

#[tokio::test]
async fn concurrent_reads_share_one_fetch() {
    let store = Arc::new(InMemoryPostStore::with_sample_posts());
    store.set_latency(Duration::from_millis(50));
    let cache = cache_over(&store, CacheConfig::default());

    let results = join_all((0..8).map(|_| cache.fetch_list())).await;

    assert_eq!(store.find_calls(), 1);
    let first = results[0].as_ref().expect("listing loads");
    for result in &results {
        let posts = result.as_ref().expect("listing loads");
        assert!(Arc::ptr_eq(first, posts));
    }
    assert!(cache.list_state().is_fresh());
}

#[tokio::test]
async fn empty_entry_loads_in_background() {
    let store = Arc::new(InMemoryPostStore::with_sample_posts());
    store.set_latency(Duration::from_millis(20));
    let cache = cache_over(&store, CacheConfig::default());
    let mut states = cache.subscribe_list();

    let first = cache.list_state();
    assert!(first.is_loading());
    assert!(first.data().is_none());

    let fresh = wait_until(&mut states, CacheState::is_fresh).await;
    assert_eq!(fresh.data().map(|posts| posts.len()), Some(store.len()));

    // Served from memory, no new store call.
    let calls = store.find_calls();
    assert!(cache.list_state().is_fresh());
    assert_eq!(store.find_calls(), calls);
}

#[tokio::test]
async fn stale_listing_is_served_while_revalidating() {
    let store = Arc::new(InMemoryPostStore::with_sample_posts());
    let cache = cache_over(&store, CacheConfig::default());
    let before = cache.fetch_list().await.expect("initial listing");

    let extra = PostDraft {
        title: "Fresh off the press".to_string(),
        excerpt: "excerpt".to_string(),
        content: "content".to_string(),
        category: "News".to_string(),
        ..Default::default()
    }
    .normalize("Tester")
    .expect("valid draft");
    store.insert(extra).await.expect("insert");
    store.set_latency(Duration::from_millis(30));

    cache.invalidate_list();
    let stale = cache.list_state();
    assert!(stale.is_stale());
    let served = stale.data().expect("stale data is kept");
    assert!(Arc::ptr_eq(served, &before));

    let mut states = cache.subscribe_list();
    let fresh = wait_until(&mut states, CacheState::is_fresh).await;
    assert_eq!(
        fresh.data().map(|posts| posts.len()),
        Some(before.len() + 1)
    );
    assert_eq!(
        fresh.data().map(|posts| posts[0].title.clone()),
        Some("Fresh off the press".to_string())
    );
}

#[tokio::test]
async fn invalidation_during_fetch_forces_refetch() {
    let store = Arc::new(InMemoryPostStore::with_sample_posts());
    store.set_latency(Duration::from_millis(80));
    let cache = cache_over(&store, CacheConfig::default());

    let pending = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.fetch_list().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(cache.subscribe_list().borrow().is_loading());

    cache.invalidate_list();
    let mut states = cache.subscribe_list();
    let result = pending.await.expect("task joins");
    assert!(result.is_ok());

    // The superseded result is not trusted; a second fetch settles the entry.
    assert!(!states.borrow().is_fresh());
    wait_until(&mut states, CacheState::is_fresh).await;
    assert_eq!(store.find_calls(), 2);
}

#[tokio::test]
async fn failed_refresh_keeps_previous_data() {
    let store = Arc::new(InMemoryPostStore::with_sample_posts());
    let cache = cache_over(
        &store,
        CacheConfig {
            refetch_max_attempts: 1,
            ..Default::default()
        },
    );
    let before = cache.fetch_list().await.expect("initial listing");

    store.set_available(false);
    let err = cache.refresh_list().await.expect_err("store is offline");
    assert!(matches!(err, PostError::BackendUnavailable { .. }));

    let state = cache.subscribe_list().borrow().clone();
    match &state {
        CacheState::Error { cause, previous } => {
            assert_eq!(cause, &err);
            let previous = previous.as_ref().expect("previous listing kept");
            assert!(Arc::ptr_eq(previous, &before));
        }
        other => panic!("expected error state, got {}", other.label()),
    }
    assert_eq!(state.data().map(|posts| posts.len()), Some(before.len()));

    store.set_available(true);
    let recovered = cache.refresh_list().await.expect("store is back");
    assert_eq!(recovered.len(), before.len());
    assert!(cache.list_state().is_fresh());
}

#[tokio::test]
async fn background_refetch_retries_until_the_store_returns() {
    let store = Arc::new(InMemoryPostStore::with_sample_posts());
    let cache = cache_over(
        &store,
        CacheConfig {
            refetch_max_attempts: 3,
            refetch_backoff_base_ms: 100,
            refetch_backoff_cap_ms: 100,
            ..Default::default()
        },
    );
    let before = cache.fetch_list().await.expect("initial listing");

    store.set_available(false);
    let mut states = cache.subscribe_list();
    states.borrow_and_update();
    cache.invalidate_list();
    cache.list_state();

    let labels = tokio::spawn(async move {
        let mut labels = Vec::new();
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            labels.push(state.label());
            if state.is_fresh() || state.error().is_some() {
                break;
            }
        }
        labels
    });

    // The first attempt fails at once; the store is back before the retry.
    tokio::time::sleep(Duration::from_millis(20)).await;
    store.set_available(true);

    let labels = timeout(WAIT, labels)
        .await
        .expect("refetch should settle in time")
        .expect("task joins");
    assert!(!labels.contains(&"error"), "states: {labels:?}");
    assert_eq!(labels.last(), Some(&"fresh"));
    assert_eq!(
        cache.list_state().data().map(|posts| posts.len()),
        Some(before.len())
    );
}

#[tokio::test]
async fn failed_listing_picks_up_own_writes() {
    let config = CacheConfig {
        refetch_max_attempts: 1,
        ..Default::default()
    };
    let store = Arc::new(InMemoryPostStore::with_sample_posts());
    let cache = cache_over(&store, config.clone());
    let queue = Arc::new(EventQueue::new(config.event_queue_limit));
    let consumer = Arc::new(CacheConsumer::new(config.clone(), cache.clone(), queue.clone()));
    let trigger = Arc::new(CacheTrigger::new(config, queue, consumer));
    let service = PostService::new(store.clone(), PostServiceConfig::default())
        .with_cache_trigger(trigger);
    let before = cache.fetch_list().await.expect("initial listing");

    store.set_available(false);
    cache.invalidate_list();
    cache.list_state();
    let mut states = cache.subscribe_list();
    let failed = wait_until(&mut states, |state| state.error().is_some()).await;
    assert!(matches!(
        failed.error(),
        Some(PostError::BackendUnavailable { .. })
    ));

    store.set_available(true);
    let capability = AdminAuthorizer::from_token("secret")
        .authorize("tests", Some("secret"))
        .expect("token should authorize");
    let created = service
        .create_post(
            &capability,
            PostDraft {
                title: "Written while failed".to_string(),
                excerpt: "excerpt".to_string(),
                content: "content".to_string(),
                category: "News".to_string(),
                ..Default::default()
            },
        )
        .await
        .expect("create");

    let fresh = wait_until(&mut states, |state| {
        state.is_fresh()
            && state
                .data()
                .is_some_and(|posts| posts.iter().any(|p| p.id == created.id))
    })
    .await;
    assert_eq!(fresh.data().map(|posts| posts.len()), Some(before.len() + 1));
}

#[tokio::test]
async fn missing_post_is_evicted() {
    let store = Arc::new(InMemoryPostStore::with_sample_posts());
    let cache = cache_over(&store, CacheConfig::default());
    let id = Uuid::new_v4();

    let err = cache.fetch_post(id).await.expect_err("unknown id");
    assert_eq!(err, PostError::NotFound { id });
    assert!(!cache.contains_post(id));
}

#[tokio::test]
async fn post_entries_are_bounded() {
    let store = Arc::new(InMemoryPostStore::with_sample_posts());
    let cache = cache_over(
        &store,
        CacheConfig {
            post_limit: 2,
            ..Default::default()
        },
    );

    let listing = cache.fetch_list().await.expect("listing");
    for post in listing.iter().take(3) {
        cache.fetch_post(post.id).await.expect("post");
    }

    assert_eq!(cache.cached_post_count(), 2);
    assert!(!cache.contains_post(listing[0].id));
    assert!(cache.contains_post(listing[2].id));
}

#[tokio::test]
async fn entries_with_a_running_fetch_are_not_evicted() {
    let store = Arc::new(InMemoryPostStore::with_sample_posts());
    let cache = cache_over(
        &store,
        CacheConfig {
            post_limit: 2,
            ..Default::default()
        },
    );
    let listing = cache.fetch_list().await.expect("listing");
    let (slow, settled, newest) = (listing[0].id, listing[1].id, listing[2].id);

    store.set_latency(Duration::from_millis(200));
    let pending = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.fetch_post(slow).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    store.set_latency(Duration::ZERO);

    cache.fetch_post(settled).await.expect("post");
    cache.fetch_post(newest).await.expect("post");

    assert_eq!(cache.cached_post_count(), 2);
    assert!(cache.contains_post(slow));
    assert!(!cache.contains_post(settled));
    assert!(cache.contains_post(newest));

    pending.await.expect("task joins").expect("slow post");
    assert!(cache.subscribe_post(slow).borrow().is_fresh());
}

#[tokio::test]
async fn watched_entries_are_not_evicted() {
    let store = Arc::new(InMemoryPostStore::with_sample_posts());
    let cache = cache_over(
        &store,
        CacheConfig {
            post_limit: 2,
            ..Default::default()
        },
    );
    let listing = cache.fetch_list().await.expect("listing");
    let watched = listing[0].id;
    let mut watcher = cache.subscribe_post(watched);

    cache.fetch_post(listing[1].id).await.expect("post");
    cache.fetch_post(listing[2].id).await.expect("post");

    assert!(cache.contains_post(watched));
    assert!(!cache.contains_post(listing[1].id));

    cache.post_state(watched);
    let fresh = wait_until(&mut watcher, CacheState::is_fresh).await;
    assert_eq!(fresh.data().map(|post| post.id), Some(watched));
}

struct Pipeline {
    store: Arc<InMemoryPostStore>,
    cache: Arc<PostCache>,
    trigger: CacheTrigger,
}

fn pipeline(config: CacheConfig) -> Pipeline {
    let store = Arc::new(InMemoryPostStore::with_sample_posts());
    let cache = cache_over(&store, config.clone());
    let queue = Arc::new(EventQueue::new(config.event_queue_limit));
    let consumer = Arc::new(CacheConsumer::new(config.clone(), cache.clone(), queue.clone()));
    Pipeline {
        store,
        cache,
        trigger: CacheTrigger::new(config, queue, consumer),
    }
}

#[tokio::test]
async fn deleted_post_disappears_after_eager_revalidation() {
    let Pipeline {
        store,
        cache,
        trigger,
    } = pipeline(CacheConfig::default());
    let listing = cache.fetch_list().await.expect("listing");
    let victim: PostRecord = listing[0].clone();
    cache.fetch_post(victim.id).await.expect("post");

    store.delete(victim.id).await.expect("delete");
    trigger.post_deleted(victim.id).await;

    let mut list_states = cache.subscribe_list();
    let fresh = wait_until(&mut list_states, |state| {
        state.is_fresh() && state.data().is_some_and(|posts| posts.len() == listing.len() - 1)
    })
    .await;
    assert!(
        fresh
            .data()
            .is_some_and(|posts| posts.iter().all(|p| p.id != victim.id))
    );

    timeout(WAIT, async {
        while cache.contains_post(victim.id) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("deleted post should be evicted");
}

#[tokio::test]
async fn queued_events_collapse_into_one_plan() {
    let Pipeline {
        store,
        cache,
        trigger,
    } = pipeline(CacheConfig {
        eager_revalidate: false,
        ..Default::default()
    });
    let listing = cache.fetch_list().await.expect("listing");
    let first = listing[0].id;
    let second = listing[1].id;
    cache.fetch_post(first).await.expect("post");
    cache.fetch_post(second).await.expect("post");

    store
        .update(
            first,
            &PostPatch {
                featured: Some(true),
                ..Default::default()
            },
        )
        .await
        .expect("update");
    for _ in 0..3 {
        trigger
            .trigger(EventKind::PostUpserted { post_id: first }, false)
            .await;
    }
    assert_eq!(trigger.queue().len(), 3);

    assert!(trigger.consumer().consume().await);
    assert!(trigger.queue().is_empty());

    assert!(cache.subscribe_list().borrow().is_stale());
    assert!(cache.subscribe_post(first).borrow().is_stale());
    assert!(cache.subscribe_post(second).borrow().is_fresh());

    let refreshed = cache.fetch_post(first).await.expect("refetch");
    assert!(refreshed.featured);
}

#[tokio::test]
async fn feed_failure_moves_listing_into_error() {
    let Pipeline { cache, trigger, .. } = pipeline(CacheConfig::default());
    let before = cache.fetch_list().await.expect("listing");

    trigger.feed_failed("change feed closed").await;

    let state = cache.subscribe_list().borrow().clone();
    assert!(matches!(
        state.error(),
        Some(PostError::Subscription { message }) if message == "change feed closed"
    ));
    assert_eq!(state.data().map(|posts| posts.len()), Some(before.len()));

    // A manual refresh clears the failure.
    cache.refresh_list().await.expect("refresh");
    assert!(cache.list_state().is_fresh());
}
