mod read;
mod types;
mod write;

use async_trait::async_trait;
use uuid::Uuid;

use crate::application::repos::{ChangeStream, PostQuery, PostStore, RepoError};
use crate::domain::entities::PostRecord;
use crate::domain::posts::{NewPost, PostPatch};

use super::PostgresPostStore;

#[async_trait]
impl PostStore for PostgresPostStore {
    async fn find(&self, query: &PostQuery) -> Result<Vec<PostRecord>, RepoError> {
        self.find_posts(query).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PostRecord>, RepoError> {
        self.find_post(id).await
    }

    async fn insert(&self, post: NewPost) -> Result<PostRecord, RepoError> {
        self.insert_post(post).await
    }

    async fn update(&self, id: Uuid, patch: &PostPatch) -> Result<PostRecord, RepoError> {
        self.update_post(id, patch).await
    }

    async fn delete(&self, id: Uuid) -> Result<(), RepoError> {
        self.delete_post(id).await
    }

    async fn subscribe(&self) -> Result<ChangeStream, RepoError> {
        self.listen_changes().await
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
