use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{ChangeEvent, RepoError};
use crate::domain::entities::PostRecord;
use crate::domain::types::{ChangeKind, PostStatus};

pub(crate) const POST_COLUMNS: &str = "id, title, excerpt, content, author, category, tags, \
     image_url, featured, status, seo_title, seo_description, seo_keywords, \
     published_at, updated_at";

#[derive(sqlx::FromRow)]
pub(crate) struct PostRow {
    pub(crate) id: Uuid,
    pub(crate) title: String,
    pub(crate) excerpt: String,
    pub(crate) content: String,
    pub(crate) author: String,
    pub(crate) category: String,
    pub(crate) tags: Vec<String>,
    pub(crate) image_url: Option<String>,
    pub(crate) featured: bool,
    pub(crate) status: PostStatus,
    pub(crate) seo_title: Option<String>,
    pub(crate) seo_description: Option<String>,
    pub(crate) seo_keywords: Vec<String>,
    pub(crate) published_at: OffsetDateTime,
    pub(crate) updated_at: OffsetDateTime,
}

impl From<PostRow> for PostRecord {
    fn from(row: PostRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            excerpt: row.excerpt,
            content: row.content,
            author: row.author,
            category: row.category,
            tags: row.tags,
            image_url: row.image_url,
            featured: row.featured,
            status: row.status,
            seo_title: row.seo_title,
            seo_description: row.seo_description,
            seo_keywords: row.seo_keywords,
            published_at: row.published_at,
            updated_at: row.updated_at,
        }
    }
}

/// Body of a `postwire_posts_changes` notification.
#[derive(Debug, Deserialize)]
pub(crate) struct NotifyPayload {
    #[serde(rename = "type")]
    op: String,
    id: Uuid,
}

impl NotifyPayload {
    pub(crate) fn parse(payload: &str) -> Result<ChangeEvent, RepoError> {
        let raw: NotifyPayload = serde_json::from_str(payload).map_err(|err| {
            RepoError::SubscriptionLost(format!("malformed change payload: {err}"))
        })?;
        let kind = ChangeKind::try_from(raw.op.as_str()).map_err(|_| {
            RepoError::SubscriptionLost(format!("unknown change type `{}`", raw.op))
        })?;
        Ok(ChangeEvent::new(kind, raw.id))
    }
}
