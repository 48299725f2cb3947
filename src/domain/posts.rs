mod data;

use time::OffsetDateTime;
use url::Url;
use uuid::Uuid;

pub use data::{SAMPLE_POSTS, SamplePost};

use crate::domain::entities::PostRecord;
use crate::domain::error::DomainError;
use crate::domain::types::PostStatus;

pub const DEFAULT_AUTHOR: &str = "AKACorpTech Team";
pub const READ_WORDS_PER_MINUTE: usize = 200;

/// Author input for a new post, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostDraft {
    pub title: String,
    pub excerpt: String,
    pub content: String,
    pub author: Option<String>,
    pub category: String,
    pub tags: Vec<String>,
    pub image_url: Option<String>,
    pub featured: bool,
    pub status: PostStatus,
    pub seo_title: Option<String>,
    pub seo_description: Option<String>,
    pub seo_keywords: Vec<String>,
}

/// A validated draft ready to be inserted. The store assigns `id`,
/// `published_at` and `updated_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub title: String,
    pub excerpt: String,
    pub content: String,
    pub author: String,
    pub category: String,
    pub tags: Vec<String>,
    pub image_url: Option<String>,
    pub featured: bool,
    pub status: PostStatus,
    pub seo_title: Option<String>,
    pub seo_description: Option<String>,
    pub seo_keywords: Vec<String>,
}

/// Partial update. `None` leaves a field untouched; for optional text fields
/// `Some(None)` clears the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostPatch {
    pub title: Option<String>,
    pub excerpt: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub image_url: Option<Option<String>>,
    pub featured: Option<bool>,
    pub status: Option<PostStatus>,
    pub seo_title: Option<Option<String>>,
    pub seo_description: Option<Option<String>>,
    pub seo_keywords: Option<Vec<String>>,
}

impl PostDraft {
    /// Validate required fields and normalize list and optional fields.
    ///
    /// Every missing required field is reported at once, in form order.
    pub fn normalize(self, default_author: &str) -> Result<NewPost, DomainError> {
        let mut missing = Vec::new();
        for (field, value) in [
            ("title", &self.title),
            ("excerpt", &self.excerpt),
            ("category", &self.category),
            ("content", &self.content),
        ] {
            if value.trim().is_empty() {
                missing.push(field);
            }
        }
        if !missing.is_empty() {
            return Err(DomainError::missing(missing));
        }

        let image_url = normalize_optional(self.image_url);
        if let Some(url) = image_url.as_deref() {
            validate_image_url(url)?;
        }

        let author = normalize_optional(self.author).unwrap_or_else(|| default_author.to_string());

        Ok(NewPost {
            title: self.title.trim().to_string(),
            excerpt: self.excerpt.trim().to_string(),
            content: self.content,
            author,
            category: self.category.trim().to_string(),
            tags: normalize_list(self.tags),
            image_url,
            featured: self.featured,
            status: self.status,
            seo_title: normalize_optional(self.seo_title),
            seo_description: normalize_optional(self.seo_description),
            seo_keywords: normalize_list(self.seo_keywords),
        })
    }
}

impl PostPatch {
    pub fn is_empty(&self) -> bool {
        *self == PostPatch::default()
    }

    /// Reject blank required fields and invalid URLs; trim and filter lists.
    pub fn normalize(self) -> Result<PostPatch, DomainError> {
        let title = normalize_required(self.title, "title")?;
        let excerpt = normalize_required(self.excerpt, "excerpt")?;
        let category = normalize_required(self.category, "category")?;
        let content = match self.content {
            Some(value) if value.trim().is_empty() => {
                return Err(DomainError::invalid("content", "must not be empty"));
            }
            other => other,
        };
        let author = normalize_required(self.author, "author")?;

        let image_url = self.image_url.map(normalize_optional);
        if let Some(Some(url)) = image_url.as_ref() {
            validate_image_url(url)?;
        }

        Ok(PostPatch {
            title,
            excerpt,
            content,
            author,
            category,
            tags: self.tags.map(normalize_list),
            image_url,
            featured: self.featured,
            status: self.status,
            seo_title: self.seo_title.map(normalize_optional),
            seo_description: self.seo_description.map(normalize_optional),
            seo_keywords: self.seo_keywords.map(normalize_list),
        })
    }

    /// Overwrite the patched fields on `record`. Timestamps are left to the caller.
    pub fn apply_to(&self, record: &mut PostRecord) {
        if let Some(title) = &self.title {
            record.title = title.clone();
        }
        if let Some(excerpt) = &self.excerpt {
            record.excerpt = excerpt.clone();
        }
        if let Some(content) = &self.content {
            record.content = content.clone();
        }
        if let Some(author) = &self.author {
            record.author = author.clone();
        }
        if let Some(category) = &self.category {
            record.category = category.clone();
        }
        if let Some(tags) = &self.tags {
            record.tags = tags.clone();
        }
        if let Some(image_url) = &self.image_url {
            record.image_url = image_url.clone();
        }
        if let Some(featured) = self.featured {
            record.featured = featured;
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(seo_title) = &self.seo_title {
            record.seo_title = seo_title.clone();
        }
        if let Some(seo_description) = &self.seo_description {
            record.seo_description = seo_description.clone();
        }
        if let Some(seo_keywords) = &self.seo_keywords {
            record.seo_keywords = seo_keywords.clone();
        }
    }
}

impl NewPost {
    pub fn into_record(
        self,
        id: Uuid,
        published_at: OffsetDateTime,
        updated_at: OffsetDateTime,
    ) -> PostRecord {
        PostRecord {
            id,
            title: self.title,
            excerpt: self.excerpt,
            content: self.content,
            author: self.author,
            category: self.category,
            tags: self.tags,
            image_url: self.image_url,
            featured: self.featured,
            status: self.status,
            seo_title: self.seo_title,
            seo_description: self.seo_description,
            seo_keywords: self.seo_keywords,
            published_at,
            updated_at,
        }
    }
}

/// Split comma-separated form input into trimmed, non-empty items.
pub fn parse_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn normalize_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn normalize_required(
    value: Option<String>,
    field: &'static str,
) -> Result<Option<String>, DomainError> {
    match value {
        Some(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err(DomainError::invalid(field, "must not be empty"));
            }
            Ok(Some(trimmed.to_string()))
        }
        None => Ok(None),
    }
}

fn validate_image_url(value: &str) -> Result<(), DomainError> {
    let url = Url::parse(value).map_err(|err| DomainError::invalid("image_url", err.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(DomainError::invalid(
            "image_url",
            format!("unsupported scheme `{other}`"),
        )),
    }
}

/// Listing order: most recently published first, ties broken by id.
pub fn sort_for_listing(posts: &mut [PostRecord]) {
    posts.sort_by(|a, b| {
        b.published_at
            .cmp(&a.published_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

/// Case-insensitive match on title, category or any tag. A blank term matches everything.
pub fn matches_search(post: &PostRecord, term: &str) -> bool {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    post.title.to_lowercase().contains(&needle)
        || post.category.to_lowercase().contains(&needle)
        || post
            .tags
            .iter()
            .any(|tag| tag.to_lowercase().contains(&needle))
}

pub fn published_only(posts: &[PostRecord]) -> Vec<&PostRecord> {
    posts
        .iter()
        .filter(|post| post.status == PostStatus::Published)
        .collect()
}

/// Partition posts into (featured, regular), keeping listing order.
pub fn split_featured<'a>(
    posts: impl IntoIterator<Item = &'a PostRecord>,
) -> (Vec<&'a PostRecord>, Vec<&'a PostRecord>) {
    posts.into_iter().partition(|post| post.featured)
}

pub fn estimate_read_minutes(content: &str) -> usize {
    let words = content.split_whitespace().count();
    words.div_ceil(READ_WORDS_PER_MINUTE).max(1)
}

pub fn format_read_time(content: &str) -> String {
    format!("{} min read", estimate_read_minutes(content))
}

/// Materialize the bundled sample posts as records with fresh ids.
pub fn sample_records(now: OffsetDateTime) -> Vec<PostRecord> {
    SAMPLE_POSTS
        .iter()
        .map(|sample| {
            let published_at = sample.published_on.midnight().assume_utc();
            PostRecord {
                id: Uuid::new_v4(),
                title: sample.title.to_string(),
                excerpt: sample.excerpt.to_string(),
                content: sample.content.to_string(),
                author: sample.author.to_string(),
                category: sample.category.to_string(),
                tags: sample.tags.iter().map(|tag| tag.to_string()).collect(),
                image_url: None,
                featured: sample.featured,
                status: PostStatus::Published,
                seo_title: None,
                seo_description: None,
                seo_keywords: Vec::new(),
                published_at,
                updated_at: now.max(published_at),
            }
        })
        .collect()
}
