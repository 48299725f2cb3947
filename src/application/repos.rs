//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::entities::PostRecord;
use crate::domain::posts::{NewPost, PostPatch};
use crate::domain::types::{ChangeKind, PostStatus};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("database timeout")]
    Timeout,
    #[error("change feed lost: {0}")]
    SubscriptionLost(String),
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PostQuery {
    pub status: Option<PostStatus>,
    pub search: Option<String>,
    pub limit: Option<u32>,
}

/// One entry of the store's change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<PostRecord>,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, id: Uuid) -> Self {
        Self {
            kind,
            id,
            record: None,
        }
    }

    pub fn with_record(kind: ChangeKind, record: PostRecord) -> Self {
        Self {
            kind,
            id: record.id,
            record: Some(record),
        }
    }
}

pub type ChangeStream = BoxStream<'static, Result<ChangeEvent, RepoError>>;

/// Collection-style boundary to the service that owns the authoritative posts.
///
/// Implementations must emit a [`ChangeEvent`] on the stream returned by
/// [`PostStore::subscribe`] for every successful insert, update and delete.
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Records matching `query`, most recently published first.
    async fn find(&self, query: &PostQuery) -> Result<Vec<PostRecord>, RepoError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PostRecord>, RepoError>;

    async fn insert(&self, post: NewPost) -> Result<PostRecord, RepoError>;

    /// Merge `patch` into the stored record and refresh `updated_at`.
    async fn update(&self, id: Uuid, patch: &PostPatch) -> Result<PostRecord, RepoError>;

    async fn delete(&self, id: Uuid) -> Result<(), RepoError>;

    async fn subscribe(&self) -> Result<ChangeStream, RepoError>;

    fn backend_name(&self) -> &'static str;
}
