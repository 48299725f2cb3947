use async_stream::stream;
use sqlx::QueryBuilder;
use sqlx::postgres::PgListener;
use tracing::warn;
use uuid::Uuid;

use crate::application::repos::{ChangeStream, PostQuery, RepoError};
use crate::domain::entities::PostRecord;

use super::super::{CHANGE_CHANNEL, PostgresPostStore, map_sqlx_error};
use super::types::{NotifyPayload, POST_COLUMNS, PostRow};

impl PostgresPostStore {
    pub(crate) async fn find_posts(&self, query: &PostQuery) -> Result<Vec<PostRecord>, RepoError> {
        let mut qb = QueryBuilder::new("SELECT ");
        qb.push(POST_COLUMNS);
        qb.push(" FROM posts WHERE 1=1 ");

        if let Some(status) = query.status {
            qb.push(" AND status = ");
            qb.push_bind(status);
        }

        if let Some(term) = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
        {
            let pattern = format!("%{}%", escape_like(term));
            qb.push(" AND (title ILIKE ");
            qb.push_bind(pattern.clone());
            qb.push(" OR category ILIKE ");
            qb.push_bind(pattern.clone());
            qb.push(" OR EXISTS (SELECT 1 FROM unnest(tags) AS tag WHERE tag ILIKE ");
            qb.push_bind(pattern);
            qb.push("))");
        }

        qb.push(" ORDER BY published_at DESC, id DESC ");

        if let Some(limit) = query.limit {
            qb.push(" LIMIT ");
            qb.push_bind(i64::from(limit));
        }

        let rows = qb
            .build_query_as::<PostRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(PostRecord::from).collect())
    }

    pub(crate) async fn find_post(&self, id: Uuid) -> Result<Option<PostRecord>, RepoError> {
        let sql = format!("SELECT {POST_COLUMNS} FROM posts WHERE id = $1");
        let row = sqlx::query_as::<_, PostRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(PostRecord::from))
    }

    /// Follow `LISTEN postwire_posts_changes`.
    ///
    /// A dropped connection or an unreadable payload ends the stream with
    /// `SubscriptionLost` instead of carrying on, since notifications may be
    /// missing from that point.
    pub(crate) async fn listen_changes(&self) -> Result<ChangeStream, RepoError> {
        let mut listener = PgListener::connect_with(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        listener
            .listen(CHANGE_CHANNEL)
            .await
            .map_err(map_sqlx_error)?;

        let stream = stream! {
            loop {
                match listener.try_recv().await {
                    Ok(Some(notification)) => match NotifyPayload::parse(notification.payload()) {
                        Ok(event) => yield Ok(event),
                        Err(err) => {
                            warn!(
                                channel = CHANGE_CHANNEL,
                                error = %err,
                                "Unreadable change notification"
                            );
                            yield Err(err);
                            break;
                        }
                    },
                    Ok(None) => {
                        yield Err(RepoError::SubscriptionLost(
                            "listener connection closed".to_string(),
                        ));
                        break;
                    }
                    Err(err) => {
                        yield Err(RepoError::SubscriptionLost(err.to_string()));
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::escape_like;

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }
}
