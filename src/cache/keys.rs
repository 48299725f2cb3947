//! Cache key definitions.

use std::fmt;

use uuid::Uuid;

/// Identifies one cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// The full post listing.
    PostList,
    /// A single post by id.
    Post(Uuid),
}

impl CacheKey {
    /// Low-cardinality label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheKey::PostList => "post_list",
            CacheKey::Post(_) => "post",
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::PostList => f.write_str("posts"),
            CacheKey::Post(id) => write!(f, "posts/{id}"),
        }
    }
}
