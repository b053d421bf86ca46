use std::sync::Arc;

use thiserror::Error;

/// Failures talking to the learning platform.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Forbidden by the learning platform: {0}")]
    AccessDenied(String),

    #[error("Not authenticated: bearer token missing or expired")]
    Unauthorized,

    #[error("No such course or trainer: {0}")]
    NotFound(String),

    #[error("Rate limited by the learning platform, retries exhausted")]
    RateLimited,

    #[error("Learning platform unavailable: {0}")]
    ServerError(String),

    #[error("Request failed: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    /// A failure observed by several callers waiting on the same request
    #[error("{0}")]
    Shared(Arc<ApiError>),
}

/// Response bodies longer than this are cut before they reach an error message
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// Whether a later attempt with the same request could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::RateLimited | ApiError::ServerError(_) | ApiError::NetworkError(_) => true,
            ApiError::Shared(inner) => inner.is_transient(),
            _ => false,
        }
    }
}
