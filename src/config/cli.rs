use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, builder::BoolishValueParser};
use uuid::Uuid;

use crate::domain::posts::{PostDraft, PostPatch, parse_list};
use crate::domain::types::PostStatus;

/// Command-line arguments for the postwire binary.
#[derive(Debug, Parser)]
#[command(name = "postwire", version, about = "Blog post data access with live cache")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "POSTWIRE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    /// Admin token authorizing create, update and delete.
    #[arg(
        long = "admin-token",
        env = "POSTWIRE_ADMIN_TOKEN",
        value_name = "TOKEN",
        hide_env_values = true,
        global = true
    )]
    pub admin_token: Option<String>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// List posts, most recently published first.
    List(ListArgs),
    /// Show a single post.
    Show(ShowArgs),
    /// Create a post.
    Create(Box<CreateArgs>),
    /// Update fields of a post.
    Update(Box<UpdateArgs>),
    /// Delete a post.
    Delete(DeleteArgs),
    /// Follow the change feed and print cache updates until interrupted.
    Watch(WatchArgs),
    /// Apply database migrations.
    Migrate,
    /// Print the SHA-256 digest of a token for `admin.token_sha256`.
    #[command(name = "token-digest")]
    TokenDigest(TokenDigestArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    Draft,
    Published,
}

impl From<StatusArg> for PostStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Draft => PostStatus::Draft,
            StatusArg::Published => PostStatus::Published,
        }
    }
}

/// Overrides accepted by every command.
#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the store backend.
    #[arg(long = "store-backend", value_name = "BACKEND", global = true)]
    pub store_backend: Option<BackendArg>,

    /// Seed the in-memory store with the demo posts.
    #[arg(
        long = "store-seed-sample-posts",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub store_seed_sample_posts: Option<bool>,

    /// Override the per-request store timeout in milliseconds.
    #[arg(long = "store-request-timeout-ms", value_name = "MS", global = true)]
    pub store_request_timeout_ms: Option<u64>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL", global = true)]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT", global = true)]
    pub database_max_connections: Option<u32>,

    /// Enable cache invalidation events.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub cache_enabled: Option<bool>,

    /// Override the per-post cache capacity.
    #[arg(long = "cache-post-limit", value_name = "COUNT", global = true)]
    pub cache_post_limit: Option<usize>,

    /// Override the consecutive change feed failures tolerated.
    #[arg(long = "realtime-max-attempts", value_name = "COUNT", global = true)]
    pub realtime_max_attempts: Option<u32>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ListArgs {
    /// Case-insensitive match on title, category or tag.
    #[arg(long, value_name = "TEXT")]
    pub search: Option<String>,

    /// Only published posts.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub published: bool,

    /// Maximum number of posts to print.
    #[arg(long, value_name = "COUNT")]
    pub limit: Option<u32>,

    /// Print JSON instead of a table.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub json: bool,
}

#[derive(Debug, Args, Clone)]
pub struct ShowArgs {
    #[arg(value_name = "ID")]
    pub id: Uuid,

    /// Print JSON instead of text.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub json: bool,
}

#[derive(Debug, Args, Clone)]
pub struct CreateArgs {
    #[arg(long)]
    pub title: String,

    #[arg(long)]
    pub excerpt: String,

    #[arg(long)]
    pub category: String,

    /// Post body. Mutually exclusive with --content-file.
    #[arg(long, conflicts_with = "content_file", required_unless_present = "content_file")]
    pub content: Option<String>,

    /// Read the post body from a file.
    #[arg(long = "content-file", value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub content_file: Option<PathBuf>,

    /// Defaults to `posts.default_author`.
    #[arg(long)]
    pub author: Option<String>,

    /// Comma-separated tags.
    #[arg(long, value_name = "LIST")]
    pub tags: Option<String>,

    #[arg(long = "image-url", value_name = "URL")]
    pub image_url: Option<String>,

    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub featured: bool,

    #[arg(long, value_enum, default_value_t = StatusArg::Draft)]
    pub status: StatusArg,

    #[arg(long = "seo-title")]
    pub seo_title: Option<String>,

    #[arg(long = "seo-description")]
    pub seo_description: Option<String>,

    /// Comma-separated SEO keywords.
    #[arg(long = "seo-keywords", value_name = "LIST")]
    pub seo_keywords: Option<String>,
}

impl CreateArgs {
    /// Build the draft once the body has been resolved.
    pub fn into_draft(self, content: String) -> PostDraft {
        PostDraft {
            title: self.title,
            excerpt: self.excerpt,
            content,
            author: self.author,
            category: self.category,
            tags: self.tags.as_deref().map(parse_list).unwrap_or_default(),
            image_url: self.image_url,
            featured: self.featured,
            status: self.status.into(),
            seo_title: self.seo_title,
            seo_description: self.seo_description,
            seo_keywords: self.seo_keywords.as_deref().map(parse_list).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct UpdateArgs {
    #[arg(value_name = "ID")]
    pub id: Uuid,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub excerpt: Option<String>,

    #[arg(long)]
    pub category: Option<String>,

    #[arg(long, conflicts_with = "content_file")]
    pub content: Option<String>,

    #[arg(long = "content-file", value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub content_file: Option<PathBuf>,

    #[arg(long)]
    pub author: Option<String>,

    /// Comma-separated tags; an empty value clears them.
    #[arg(long, value_name = "LIST")]
    pub tags: Option<String>,

    /// An empty value clears the image.
    #[arg(long = "image-url", value_name = "URL")]
    pub image_url: Option<String>,

    #[arg(long, value_name = "BOOL", value_parser = BoolishValueParser::new())]
    pub featured: Option<bool>,

    #[arg(long, value_enum)]
    pub status: Option<StatusArg>,

    #[arg(long = "seo-title")]
    pub seo_title: Option<String>,

    #[arg(long = "seo-description")]
    pub seo_description: Option<String>,

    #[arg(long = "seo-keywords", value_name = "LIST")]
    pub seo_keywords: Option<String>,
}

impl UpdateArgs {
    pub fn into_patch(self, content: Option<String>) -> PostPatch {
        PostPatch {
            title: self.title,
            excerpt: self.excerpt,
            content,
            author: self.author,
            category: self.category,
            tags: self.tags.as_deref().map(parse_list),
            image_url: self.image_url.map(Some),
            featured: self.featured,
            status: self.status.map(Into::into),
            seo_title: self.seo_title.map(Some),
            seo_description: self.seo_description.map(Some),
            seo_keywords: self.seo_keywords.as_deref().map(parse_list),
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct DeleteArgs {
    #[arg(value_name = "ID")]
    pub id: Uuid,
}

#[derive(Debug, Args, Default, Clone)]
pub struct WatchArgs {
    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long = "duration-secs", value_name = "SECONDS")]
    pub duration_secs: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct TokenDigestArgs {
    #[arg(value_name = "TOKEN")]
    pub token: String,
}
