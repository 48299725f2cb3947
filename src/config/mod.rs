//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    num::{NonZeroU32, NonZeroU64, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::domain::posts::DEFAULT_AUTHOR;

mod cli;

pub use cli::*;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "postwire";
const ENV_PREFIX: &str = "POSTWIRE";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_DB_ACQUIRE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_CACHE_POST_LIMIT: usize = 500;
const DEFAULT_CACHE_CONSUME_BATCH_LIMIT: usize = 100;
const DEFAULT_CACHE_EVENT_QUEUE_LIMIT: usize = 1024;
const DEFAULT_CACHE_REFETCH_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_CACHE_REFETCH_BACKOFF_BASE_MS: u64 = 250;
const DEFAULT_CACHE_REFETCH_BACKOFF_CAP_MS: u64 = 5_000;
const DEFAULT_REALTIME_MAX_ATTEMPTS: u32 = 8;
const DEFAULT_REALTIME_BACKOFF_BASE_MS: u64 = 1_000;
const DEFAULT_REALTIME_BACKOFF_CAP_MS: u64 = 30_000;
const DEFAULT_REALTIME_BACKOFF_JITTER: f64 = 0.2;
const DEFAULT_REALTIME_EVENT_BUFFER: usize = 256;
const DEFAULT_REALTIME_SUBSCRIBE_TIMEOUT_MS: u64 = 10_000;

/// Fully resolved application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub store: StoreSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub realtime: RealtimeSettings,
    pub posts: PostsSettings,
    pub admin: AdminSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Postgres,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(format!("unknown backend `{other}`")),
        }
    }
}

impl From<BackendArg> for StoreBackend {
    fn from(value: BackendArg) -> Self {
        match value {
            BackendArg::Memory => Self::Memory,
            BackendArg::Postgres => Self::Postgres,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    /// Seed the in-memory backend with the demo posts.
    pub seed_sample_posts: bool,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
    pub acquire_timeout_ms: NonZeroU64,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub post_limit: usize,
    pub consume_batch_limit: usize,
    pub event_queue_limit: usize,
    pub eager_revalidate: bool,
    pub refetch_max_attempts: u32,
    pub refetch_backoff_base_ms: u64,
    pub refetch_backoff_cap_ms: u64,
}

#[derive(Debug, Clone)]
pub struct RealtimeSettings {
    pub enabled: bool,
    pub max_attempts: NonZeroU32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub backoff_jitter: f64,
    pub event_buffer: NonZeroUsize,
    /// Bound on a single subscribe call to the change feed.
    pub subscribe_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PostsSettings {
    pub default_author: String,
}

#[derive(Debug, Clone, Default)]
pub struct AdminSettings {
    /// Hex SHA-256 digest of the admin token.
    pub token_sha256: Option<String>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    store: RawStoreSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    realtime: RawRealtimeSettings,
    posts: RawPostsSettings,
    admin: RawAdminSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(backend) = overrides.store_backend {
            self.store.backend = Some(StoreBackend::from(backend));
        }
        if let Some(seed) = overrides.store_seed_sample_posts {
            self.store.seed_sample_posts = Some(seed);
        }
        if let Some(timeout) = overrides.store_request_timeout_ms {
            self.store.request_timeout_ms = Some(timeout);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(limit) = overrides.cache_post_limit {
            self.cache.post_limit = Some(limit);
        }
        if let Some(attempts) = overrides.realtime_max_attempts {
            self.realtime.max_attempts = Some(attempts);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            store,
            database,
            cache,
            realtime,
            posts,
            admin,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let store = build_store_settings(store)?;
        let database = build_database_settings(database)?;
        let cache = build_cache_settings(cache)?;
        let realtime = build_realtime_settings(realtime)?;
        let posts = build_posts_settings(posts);
        let admin = build_admin_settings(admin)?;

        if store.backend == StoreBackend::Postgres && database.url.is_none() {
            return Err(LoadError::invalid(
                "database.url",
                "required when store.backend is `postgres`",
            ));
        }

        Ok(Self {
            logging,
            store,
            database,
            cache,
            realtime,
            posts,
            admin,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let timeout_ms = store
        .request_timeout_ms
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
    let timeout_ms = non_zero_u64(timeout_ms, "store.request_timeout_ms")?;

    Ok(StoreSettings {
        backend: store.backend.unwrap_or(StoreBackend::Memory),
        seed_sample_posts: store.seed_sample_posts.unwrap_or(true),
        request_timeout: Duration::from_millis(timeout_ms.get()),
    })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = database
        .max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
    let max_connections = non_zero_u32(max_connections.into(), "database.max_connections")?;
    let acquire_timeout_ms = non_zero_u64(
        database
            .acquire_timeout_ms
            .unwrap_or(DEFAULT_DB_ACQUIRE_TIMEOUT_MS),
        "database.acquire_timeout_ms",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
        acquire_timeout_ms,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let post_limit = cache.post_limit.unwrap_or(DEFAULT_CACHE_POST_LIMIT);
    if post_limit == 0 {
        return Err(LoadError::invalid(
            "cache.post_limit",
            "must be greater than zero",
        ));
    }
    let consume_batch_limit = cache
        .consume_batch_limit
        .unwrap_or(DEFAULT_CACHE_CONSUME_BATCH_LIMIT);
    if consume_batch_limit == 0 {
        return Err(LoadError::invalid(
            "cache.consume_batch_limit",
            "must be greater than zero",
        ));
    }
    let event_queue_limit = cache
        .event_queue_limit
        .unwrap_or(DEFAULT_CACHE_EVENT_QUEUE_LIMIT);
    if event_queue_limit == 0 {
        return Err(LoadError::invalid(
            "cache.event_queue_limit",
            "must be greater than zero",
        ));
    }

    let refetch_backoff_base_ms = cache
        .refetch_backoff_base_ms
        .unwrap_or(DEFAULT_CACHE_REFETCH_BACKOFF_BASE_MS);
    let refetch_backoff_cap_ms = cache
        .refetch_backoff_cap_ms
        .unwrap_or(DEFAULT_CACHE_REFETCH_BACKOFF_CAP_MS);
    if refetch_backoff_cap_ms < refetch_backoff_base_ms {
        return Err(LoadError::invalid(
            "cache.refetch_backoff_cap_ms",
            "must not be smaller than cache.refetch_backoff_base_ms",
        ));
    }

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        post_limit,
        consume_batch_limit,
        event_queue_limit,
        eager_revalidate: cache.eager_revalidate.unwrap_or(true),
        refetch_max_attempts: cache
            .refetch_max_attempts
            .unwrap_or(DEFAULT_CACHE_REFETCH_MAX_ATTEMPTS),
        refetch_backoff_base_ms,
        refetch_backoff_cap_ms,
    })
}

fn build_realtime_settings(realtime: RawRealtimeSettings) -> Result<RealtimeSettings, LoadError> {
    let max_attempts = non_zero_u32(
        realtime
            .max_attempts
            .unwrap_or(DEFAULT_REALTIME_MAX_ATTEMPTS)
            .into(),
        "realtime.max_attempts",
    )?;

    let backoff_base_ms = realtime
        .backoff_base_ms
        .unwrap_or(DEFAULT_REALTIME_BACKOFF_BASE_MS);
    let backoff_cap_ms = realtime
        .backoff_cap_ms
        .unwrap_or(DEFAULT_REALTIME_BACKOFF_CAP_MS);
    if backoff_cap_ms < backoff_base_ms {
        return Err(LoadError::invalid(
            "realtime.backoff_cap_ms",
            "must not be smaller than realtime.backoff_base_ms",
        ));
    }

    let backoff_jitter = realtime
        .backoff_jitter
        .unwrap_or(DEFAULT_REALTIME_BACKOFF_JITTER);
    if !(0.0..=1.0).contains(&backoff_jitter) {
        return Err(LoadError::invalid(
            "realtime.backoff_jitter",
            "must be between 0 and 1",
        ));
    }

    let event_buffer = realtime
        .event_buffer
        .unwrap_or(DEFAULT_REALTIME_EVENT_BUFFER);
    let event_buffer = NonZeroUsize::new(event_buffer)
        .ok_or_else(|| LoadError::invalid("realtime.event_buffer", "must be greater than zero"))?;

    let subscribe_timeout_ms = non_zero_u64(
        realtime
            .subscribe_timeout_ms
            .unwrap_or(DEFAULT_REALTIME_SUBSCRIBE_TIMEOUT_MS),
        "realtime.subscribe_timeout_ms",
    )?;

    Ok(RealtimeSettings {
        enabled: realtime.enabled.unwrap_or(true),
        max_attempts,
        backoff_base_ms,
        backoff_cap_ms,
        backoff_jitter,
        event_buffer,
        subscribe_timeout: Duration::from_millis(subscribe_timeout_ms.get()),
    })
}

fn build_posts_settings(posts: RawPostsSettings) -> PostsSettings {
    let default_author = posts
        .default_author
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_AUTHOR.to_string());

    PostsSettings { default_author }
}

fn build_admin_settings(admin: RawAdminSettings) -> Result<AdminSettings, LoadError> {
    let token_sha256 = admin
        .token_sha256
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty());

    if let Some(digest) = token_sha256.as_deref() {
        let valid = digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit());
        if !valid {
            return Err(LoadError::invalid(
                "admin.token_sha256",
                "expected 64 hexadecimal characters",
            ));
        }
    }

    Ok(AdminSettings { token_sha256 })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    backend: Option<StoreBackend>,
    seed_sample_posts: Option<bool>,
    request_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
    acquire_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    post_limit: Option<usize>,
    consume_batch_limit: Option<usize>,
    event_queue_limit: Option<usize>,
    eager_revalidate: Option<bool>,
    refetch_max_attempts: Option<u32>,
    refetch_backoff_base_ms: Option<u64>,
    refetch_backoff_cap_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRealtimeSettings {
    enabled: Option<bool>,
    max_attempts: Option<u32>,
    backoff_base_ms: Option<u64>,
    backoff_cap_ms: Option<u64>,
    backoff_jitter: Option<f64>,
    event_buffer: Option<usize>,
    subscribe_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPostsSettings {
    default_author: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAdminSettings {
    token_sha256: Option<String>,
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_u64(value: u64, key: &'static str) -> Result<NonZeroU64, LoadError> {
    NonZeroU64::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

#[cfg(test)]
mod tests;
