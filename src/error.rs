//! Error types for player resolution.

use thiserror::Error;

/// Every failure a resolution request can end in.
///
/// Errors are `Clone` because a single failed player analysis is handed to
/// every caller that was waiting on it.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("Bad Request, missing {0}")]
    Validation(String),

    #[error("Invalid JSON body: {0}")]
    MalformedRequest(String),

    #[error("Failed to fetch player script: {0}")]
    PlayerFetch(String),

    #[error("Failed to analyze player script: {0}")]
    Analysis(String),

    #[error("Transform execution failed: {0}")]
    Execution(String),

    #[error("Failed to resolve stream URL: {0}")]
    Resolution(String),
}

impl ResolveError {
    pub(crate) fn missing(field: &str) -> Self {
        ResolveError::Validation(field.to_string())
    }

    /// Errors caused by the request itself rather than by the player.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ResolveError::Validation(_) | ResolveError::MalformedRequest(_)
        )
    }

    /// Check if repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ResolveError::PlayerFetch(_))
    }
}

impl From<reqwest::Error> for ResolveError {
    fn from(err: reqwest::Error) -> Self {
        ResolveError::PlayerFetch(err.to_string())
    }
}

impl From<serde_json::Error> for ResolveError {
    fn from(err: serde_json::Error) -> Self {
        ResolveError::MalformedRequest(err.to_string())
    }
}
