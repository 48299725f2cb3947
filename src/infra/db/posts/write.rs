use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::RepoError;
use crate::domain::entities::PostRecord;
use crate::domain::posts::{NewPost, PostPatch};

use super::super::{PostgresPostStore, map_sqlx_error};
use super::types::{POST_COLUMNS, PostRow};

impl PostgresPostStore {
    pub(crate) async fn insert_post(&self, post: NewPost) -> Result<PostRecord, RepoError> {
        let NewPost {
            title,
            excerpt,
            content,
            author,
            category,
            tags,
            image_url,
            featured,
            status,
            seo_title,
            seo_description,
            seo_keywords,
        } = post;

        let id = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        let sql = format!(
            "INSERT INTO posts (\
                 id, title, excerpt, content, author, category, tags, image_url, featured, \
                 status, seo_title, seo_description, seo_keywords, published_at, updated_at\
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $14) \
             RETURNING {POST_COLUMNS}"
        );

        let row = sqlx::query_as::<_, PostRow>(&sql)
            .bind(id)
            .bind(title)
            .bind(excerpt)
            .bind(content)
            .bind(author)
            .bind(category)
            .bind(tags)
            .bind(image_url)
            .bind(featured)
            .bind(status)
            .bind(seo_title)
            .bind(seo_description)
            .bind(seo_keywords)
            .bind(now)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(PostRecord::from(row))
    }

    /// `published_at` is never touched; `updated_at` moves strictly forward.
    pub(crate) async fn update_post(
        &self,
        id: Uuid,
        patch: &PostPatch,
    ) -> Result<PostRecord, RepoError> {
        let sql = format!(
            "UPDATE posts SET \
                 title = COALESCE($2, title), \
                 excerpt = COALESCE($3, excerpt), \
                 content = COALESCE($4, content), \
                 author = COALESCE($5, author), \
                 category = COALESCE($6, category), \
                 tags = COALESCE($7, tags), \
                 image_url = CASE WHEN $8 THEN $9 ELSE image_url END, \
                 featured = COALESCE($10, featured), \
                 status = COALESCE($11, status), \
                 seo_title = CASE WHEN $12 THEN $13 ELSE seo_title END, \
                 seo_description = CASE WHEN $14 THEN $15 ELSE seo_description END, \
                 seo_keywords = COALESCE($16, seo_keywords), \
                 updated_at = GREATEST(now(), updated_at + interval '1 microsecond') \
             WHERE id = $1 \
             RETURNING {POST_COLUMNS}"
        );

        let row = sqlx::query_as::<_, PostRow>(&sql)
            .bind(id)
            .bind(patch.title.as_deref())
            .bind(patch.excerpt.as_deref())
            .bind(patch.content.as_deref())
            .bind(patch.author.as_deref())
            .bind(patch.category.as_deref())
            .bind(patch.tags.as_deref())
            .bind(patch.image_url.is_some())
            .bind(patch.image_url.clone().flatten())
            .bind(patch.featured)
            .bind(patch.status)
            .bind(patch.seo_title.is_some())
            .bind(patch.seo_title.clone().flatten())
            .bind(patch.seo_description.is_some())
            .bind(patch.seo_description.clone().flatten())
            .bind(patch.seo_keywords.as_deref())
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        row.map(PostRecord::from).ok_or(RepoError::NotFound)
    }

    pub(crate) async fn delete_post(&self, id: Uuid) -> Result<(), RepoError> {
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}
