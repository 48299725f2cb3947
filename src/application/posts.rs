//! Typed read/write operations against the post store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::application::error::PostError;
use crate::application::repos::{PostQuery, PostStore, RepoError};
use crate::application::session::AdminCapability;
use crate::cache::CacheTrigger;
use crate::domain::entities::PostRecord;
use crate::domain::posts::{DEFAULT_AUTHOR, PostDraft, PostPatch};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct PostServiceConfig {
    /// Upper bound for every store call; expiry surfaces as `BackendUnavailable`.
    pub request_timeout: Duration,
    pub default_author: String,
}

impl Default for PostServiceConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            default_author: DEFAULT_AUTHOR.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct PostService {
    store: Arc<dyn PostStore>,
    config: PostServiceConfig,
    cache_trigger: Option<Arc<CacheTrigger>>,
}

impl PostService {
    pub fn new(store: Arc<dyn PostStore>, config: PostServiceConfig) -> Self {
        Self {
            store,
            config,
            cache_trigger: None,
        }
    }

    /// Mark cache entries stale after each successful mutation.
    pub fn with_cache_trigger(mut self, trigger: Arc<CacheTrigger>) -> Self {
        self.cache_trigger = Some(trigger);
        self
    }

    pub fn store(&self) -> &Arc<dyn PostStore> {
        &self.store
    }

    pub fn config(&self) -> &PostServiceConfig {
        &self.config
    }

    /// All posts, most recently published first.
    pub async fn list_posts(&self) -> Result<Vec<PostRecord>, PostError> {
        self.find_posts(&PostQuery::default()).await
    }

    pub async fn find_posts(&self, query: &PostQuery) -> Result<Vec<PostRecord>, PostError> {
        self.call("find", None, self.store.find(query)).await
    }

    pub async fn get_post(&self, id: Uuid) -> Result<PostRecord, PostError> {
        self.call("find_by_id", Some(id), self.store.find_by_id(id))
            .await?
            .ok_or(PostError::NotFound { id })
    }

    #[instrument(skip(self, capability, draft), fields(actor = capability.actor()))]
    pub async fn create_post(
        &self,
        capability: &AdminCapability,
        draft: PostDraft,
    ) -> Result<PostRecord, PostError> {
        let new_post = draft.normalize(&self.config.default_author)?;
        let post = self.call("insert", None, self.store.insert(new_post)).await?;

        info!(post_id = %post.id, status = %post.status, "Post created");

        if let Some(trigger) = &self.cache_trigger {
            trigger.post_upserted(post.id).await;
        }

        Ok(post)
    }

    #[instrument(skip(self, capability, patch), fields(actor = capability.actor()))]
    pub async fn update_post(
        &self,
        capability: &AdminCapability,
        id: Uuid,
        patch: PostPatch,
    ) -> Result<PostRecord, PostError> {
        let patch = patch.normalize()?;
        let post = self
            .call("update", Some(id), self.store.update(id, &patch))
            .await?;

        info!(post_id = %post.id, status = %post.status, "Post updated");

        if let Some(trigger) = &self.cache_trigger {
            trigger.post_upserted(post.id).await;
        }

        Ok(post)
    }

    #[instrument(skip(self, capability), fields(actor = capability.actor()))]
    pub async fn delete_post(&self, capability: &AdminCapability, id: Uuid) -> Result<(), PostError> {
        self.call("delete", Some(id), self.store.delete(id)).await?;

        info!(post_id = %id, "Post deleted");

        if let Some(trigger) = &self.cache_trigger {
            trigger.post_deleted(id).await;
        }

        Ok(())
    }

    async fn call<T, F>(&self, op: &'static str, id: Option<Uuid>, fut: F) -> Result<T, PostError>
    where
        F: Future<Output = Result<T, RepoError>>,
    {
        match timeout(self.config.request_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                if !matches!(err, RepoError::NotFound) {
                    warn!(
                        op,
                        backend = self.store.backend_name(),
                        error = %err,
                        "Post store request failed"
                    );
                }
                Err(PostError::from_repo(err, id))
            }
            Err(_) => {
                let timeout_ms = self.config.request_timeout.as_millis() as u64;
                warn!(
                    op,
                    backend = self.store.backend_name(),
                    timeout_ms,
                    "Post store request timed out"
                );
                Err(PostError::backend_unavailable(format!(
                    "{op} timed out after {timeout_ms} ms"
                )))
            }
        }
    }
}
