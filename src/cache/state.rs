//! Observable state of a single cache entry.

use std::sync::Arc;

use time::OffsetDateTime;

use crate::application::error::PostError;

/// State of one cache entry, replaced as a whole on every transition.
///
/// `data()` is what a reader renders: `Loading`, `Stale` and `Error` keep the
/// last good value when there was one.
#[derive(Debug)]
pub enum CacheState<T> {
    Empty,
    Loading {
        previous: Option<Arc<T>>,
    },
    Fresh {
        data: Arc<T>,
        fetched_at: OffsetDateTime,
    },
    Stale {
        data: Arc<T>,
    },
    Error {
        cause: PostError,
        previous: Option<Arc<T>>,
    },
}

// Derive would require `T: Clone`; only the `Arc`s are cloned.
impl<T> Clone for CacheState<T> {
    fn clone(&self) -> Self {
        match self {
            CacheState::Empty => CacheState::Empty,
            CacheState::Loading { previous } => CacheState::Loading {
                previous: previous.clone(),
            },
            CacheState::Fresh { data, fetched_at } => CacheState::Fresh {
                data: Arc::clone(data),
                fetched_at: *fetched_at,
            },
            CacheState::Stale { data } => CacheState::Stale {
                data: Arc::clone(data),
            },
            CacheState::Error { cause, previous } => CacheState::Error {
                cause: cause.clone(),
                previous: previous.clone(),
            },
        }
    }
}

impl<T> CacheState<T> {
    /// Last known data, if any.
    pub fn data(&self) -> Option<&Arc<T>> {
        match self {
            CacheState::Empty => None,
            CacheState::Loading { previous } | CacheState::Error { previous, .. } => {
                previous.as_ref()
            }
            CacheState::Fresh { data, .. } | CacheState::Stale { data } => Some(data),
        }
    }

    /// Nothing to show yet and a fetch is running.
    pub fn is_pending(&self) -> bool {
        matches!(self, CacheState::Loading { previous: None })
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, CacheState::Loading { .. })
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, CacheState::Fresh { .. })
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, CacheState::Stale { .. })
    }

    pub fn error(&self) -> Option<&PostError> {
        match self {
            CacheState::Error { cause, .. } => Some(cause),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CacheState::Empty => "empty",
            CacheState::Loading { .. } => "loading",
            CacheState::Fresh { .. } => "fresh",
            CacheState::Stale { .. } => "stale",
            CacheState::Error { .. } => "error",
        }
    }

    /// Transition applied on invalidation.
    ///
    /// Fresh data goes stale. A failed fetch is retried through the normal
    /// stale path, or from scratch when nothing was loaded before. A change
    /// feed failure stays until the listing is refreshed explicitly.
    pub(crate) fn invalidated(&self) -> Option<Self> {
        match self {
            CacheState::Fresh { data, .. } => Some(CacheState::Stale {
                data: Arc::clone(data),
            }),
            CacheState::Error {
                cause: PostError::Subscription { .. },
                ..
            } => None,
            CacheState::Error { previous, .. } => Some(match previous {
                Some(data) => CacheState::Stale {
                    data: Arc::clone(data),
                },
                None => CacheState::Empty,
            }),
            _ => None,
        }
    }
}
