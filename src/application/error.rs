use std::error::Error as StdError;

use thiserror::Error;
use uuid::Uuid;

use crate::{
    application::{repos::RepoError, session::AuthError},
    domain::error::DomainError,
    infra::error::InfraError,
};

/// Error chain flattened for logging at the process boundary.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }
}

/// Failure taxonomy of the post data-access layer.
///
/// `Validation` and `NotFound` are final for the caller; `BackendUnavailable`
/// and `Subscription` are transport failures that may be retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PostError {
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error("post `{id}` not found")]
    NotFound { id: Uuid },
    #[error("backend unavailable: {message}")]
    BackendUnavailable { message: String },
    #[error("change feed unavailable: {message}")]
    Subscription { message: String },
}

impl PostError {
    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            message: message.into(),
        }
    }

    pub fn subscription(message: impl Into<String>) -> Self {
        Self::Subscription {
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PostError::BackendUnavailable { .. } | PostError::Subscription { .. }
        )
    }

    /// Map a store failure for an operation that targeted `id`, when there was one.
    pub fn from_repo(err: RepoError, id: Option<Uuid>) -> Self {
        match err {
            RepoError::NotFound => PostError::NotFound {
                id: id.unwrap_or_else(Uuid::nil),
            },
            RepoError::InvalidInput { message } => {
                PostError::Validation(DomainError::invalid("post", message))
            }
            RepoError::SubscriptionLost(message) => PostError::Subscription { message },
            RepoError::Timeout => PostError::backend_unavailable("store request timed out"),
            RepoError::Unavailable(message) | RepoError::Persistence(message) => {
                PostError::BackendUnavailable { message }
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Post(#[from] PostError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from_error("application::error::AppError", self)
    }
}
