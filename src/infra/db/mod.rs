//! Postgres-backed post store.

mod posts;
mod util;

pub use util::map_sqlx_error;

use std::sync::Arc;
use std::time::Duration;

use sqlx::{
    query,
    postgres::{PgPool, PgPoolOptions},
};
use tracing::info;

use crate::config::DatabaseSettings;
use crate::infra::error::InfraError;

/// Channel the `posts_notify_change` trigger publishes on.
pub const CHANGE_CHANNEL: &str = "postwire_posts_changes";

#[derive(Clone)]
pub struct PostgresPostStore {
    pool: Arc<PgPool>,
}

impl PostgresPostStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool from settings. Fails when no URL is configured.
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, InfraError> {
        let url = settings.url.as_deref().ok_or_else(|| {
            InfraError::configuration("database.url is required for the postgres backend")
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections.get())
            .acquire_timeout(Duration::from_millis(settings.acquire_timeout_ms.get()))
            .connect(url)
            .await
            .map_err(|err| InfraError::database(format!("failed to connect: {err}")))?;

        info!(
            max_connections = settings.max_connections.get(),
            "Connected to Postgres"
        );
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<(), InfraError> {
        sqlx::migrate!("./migrations")
            .run(self.pool())
            .await
            .map_err(InfraError::from)
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }
}
