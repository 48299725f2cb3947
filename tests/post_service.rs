//! Post service behavior over the in-memory store: validation, admin checks,
//! timeouts and cache notification on writes.

use std::sync::Arc;
use std::time::Duration;

use postwire::application::error::PostError;
use postwire::application::posts::{PostService, PostServiceConfig};
use postwire::application::repos::PostQuery;
use postwire::application::session::{AdminAuthorizer, AdminCapability, AuthError};
use postwire::cache::{CacheConfig, CacheConsumer, CacheTrigger, EventQueue, PostCache};
use postwire::domain::error::DomainError;
use postwire::domain::posts::{PostDraft, PostPatch};
use postwire::domain::types::PostStatus;
use postwire::infra::memory::InMemoryPostStore;
use uuid::Uuid;

const TOKEN: &str = "editor-token";

fn admin() -> AdminCapability {
    AdminAuthorizer::from_token(TOKEN)
        .authorize("tests", Some(TOKEN))
        .expect("token should authorize")
}

fn draft(title: &str) -> PostDraft {
    PostDraft {
        title: title.to_string(),
        excerpt: "A short excerpt".to_string(),
        content: "word ".repeat(450),
        category: "Engineering".to_string(),
        tags: vec!["rust".to_string(), " ".to_string()],
        ..Default::default()
    }
}

fn service_over(store: Arc<InMemoryPostStore>) -> PostService {
    PostService::new(store, PostServiceConfig::default())
}

#[tokio::test]
async fn create_then_read_back() {
    let store = Arc::new(InMemoryPostStore::new());
    let service = service_over(store.clone());

    let created = service
        .create_post(&admin(), draft("  Hello postwire  "))
        .await
        .expect("create should succeed");

    assert_eq!(created.title, "Hello postwire");
    assert_eq!(created.tags, vec!["rust".to_string()]);
    assert_eq!(created.author, service.config().default_author);
    assert_eq!(created.status, PostStatus::Draft);

    let fetched = service.get_post(created.id).await.expect("post exists");
    assert_eq!(fetched, created);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn missing_fields_are_reported_together() {
    let service = service_over(Arc::new(InMemoryPostStore::new()));

    let err = service
        .create_post(
            &admin(),
            PostDraft {
                title: "Only a title".to_string(),
                ..Default::default()
            },
        )
        .await
        .expect_err("incomplete draft must fail");

    assert_eq!(
        err,
        PostError::Validation(DomainError::MissingFields {
            fields: vec!["excerpt", "category", "content"],
        })
    );
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn invalid_image_url_is_rejected() {
    let service = service_over(Arc::new(InMemoryPostStore::new()));

    let err = service
        .create_post(
            &admin(),
            PostDraft {
                image_url: Some("not a url".to_string()),
                ..draft("With image")
            },
        )
        .await
        .expect_err("bad url must fail");

    assert!(matches!(
        err,
        PostError::Validation(DomainError::InvalidField { field: "image_url", .. })
    ));
}

#[test]
fn admin_token_is_checked() {
    let authorizer = AdminAuthorizer::from_token(TOKEN);
    assert!(matches!(
        authorizer.authorize("tests", Some("wrong")),
        Err(AuthError::Invalid)
    ));
    assert!(matches!(
        authorizer.authorize("tests", None),
        Err(AuthError::Missing)
    ));
    assert!(matches!(
        AdminAuthorizer::disabled().authorize("tests", Some(TOKEN)),
        Err(AuthError::NotConfigured)
    ));

    let digest = AdminAuthorizer::token_digest(TOKEN);
    let from_digest = AdminAuthorizer::from_token_sha256(&digest).expect("valid digest");
    assert!(from_digest.authorize("tests", Some(TOKEN)).is_ok());
}

#[tokio::test]
async fn update_and_delete_lifecycle() {
    let service = service_over(Arc::new(InMemoryPostStore::new()));
    let capability = admin();
    let post = service
        .create_post(&capability, draft("Lifecycle"))
        .await
        .expect("create");

    let updated = service
        .update_post(
            &capability,
            post.id,
            PostPatch {
                status: Some(PostStatus::Published),
                image_url: Some(Some("https://example.com/cover.png".to_string())),
                ..Default::default()
            },
        )
        .await
        .expect("update");

    assert_eq!(updated.status, PostStatus::Published);
    assert_eq!(updated.title, post.title);
    assert_eq!(updated.published_at, post.published_at);
    assert!(updated.updated_at > post.updated_at);

    service
        .delete_post(&capability, post.id)
        .await
        .expect("delete");
    assert_eq!(
        service.get_post(post.id).await,
        Err(PostError::NotFound { id: post.id })
    );
    assert_eq!(
        service.delete_post(&capability, post.id).await,
        Err(PostError::NotFound { id: post.id })
    );
}

#[tokio::test]
async fn blank_patch_fields_are_rejected() {
    let service = service_over(Arc::new(InMemoryPostStore::with_sample_posts()));
    let id = service.list_posts().await.expect("list")[0].id;

    let err = service
        .update_post(
            &admin(),
            id,
            PostPatch {
                title: Some("   ".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect_err("blank title must fail");

    assert!(matches!(err, PostError::Validation(_)));
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let service = service_over(Arc::new(InMemoryPostStore::with_sample_posts()));
    let id = Uuid::new_v4();

    assert_eq!(service.get_post(id).await, Err(PostError::NotFound { id }));
    assert_eq!(
        service
            .update_post(&admin(), id, PostPatch::default())
            .await,
        Err(PostError::NotFound { id })
    );
}

#[tokio::test]
async fn listing_is_newest_first_and_filterable() {
    let service = service_over(Arc::new(InMemoryPostStore::with_sample_posts()));

    let posts = service.list_posts().await.expect("list");
    assert!(!posts.is_empty());
    assert!(
        posts
            .windows(2)
            .all(|pair| pair[0].published_at >= pair[1].published_at)
    );

    let published = service
        .find_posts(&PostQuery {
            status: Some(PostStatus::Published),
            limit: Some(2),
            ..Default::default()
        })
        .await
        .expect("find");
    assert_eq!(published.len(), 2);
    assert!(published.iter().all(|p| p.status == PostStatus::Published));
}

#[tokio::test]
async fn offline_store_surfaces_backend_unavailable() {
    let store = Arc::new(InMemoryPostStore::with_sample_posts());
    store.set_available(false);
    let service = service_over(store);

    let err = service.list_posts().await.expect_err("store is offline");
    assert!(matches!(err, PostError::BackendUnavailable { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn slow_store_times_out() {
    let store = Arc::new(InMemoryPostStore::with_sample_posts());
    store.set_latency(Duration::from_millis(300));
    let service = PostService::new(
        store,
        PostServiceConfig {
            request_timeout: Duration::from_millis(20),
            ..Default::default()
        },
    );

    let err = service.list_posts().await.expect_err("request must time out");
    assert!(matches!(err, PostError::BackendUnavailable { .. }));
}

#[tokio::test]
async fn writes_mark_cached_entries_stale() {
    let store = Arc::new(InMemoryPostStore::with_sample_posts());
    let config = CacheConfig {
        eager_revalidate: false,
        ..Default::default()
    };
    let cache = PostCache::new(
        config.clone(),
        PostService::new(store.clone(), PostServiceConfig::default()),
    );
    let queue = Arc::new(EventQueue::new(config.event_queue_limit));
    let consumer = Arc::new(CacheConsumer::new(config.clone(), cache.clone(), queue.clone()));
    let trigger = Arc::new(CacheTrigger::new(config, queue, consumer));
    let service = PostService::new(store, PostServiceConfig::default()).with_cache_trigger(trigger);

    let listing = cache.fetch_list().await.expect("initial listing");
    let target = listing[0].id;
    cache.fetch_post(target).await.expect("post fetch");
    assert!(cache.list_state().is_fresh());

    service
        .update_post(
            &admin(),
            target,
            PostPatch {
                featured: Some(true),
                ..Default::default()
            },
        )
        .await
        .expect("update");

    let list = cache.subscribe_list().borrow().clone();
    assert!(list.is_stale());
    assert_eq!(list.data().map(|posts| posts.len()), Some(listing.len()));
    assert!(cache.subscribe_post(target).borrow().is_stale());

    let refreshed = cache.fetch_post(target).await.expect("refetch");
    assert!(refreshed.featured);
}
