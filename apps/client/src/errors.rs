use serde::Serialize;
use thiserror::Error;

use crate::remote::rate_limit::RateLimitInfo;
use crate::storage::StorageError;

/// Client-level error type.
/// Operations return `Result<T, ClientError>`; components turn failures into
/// something displayable with `into_user_error`.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited")]
    RateLimited { info: Option<RateLimitInfo> },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Draft not saved: {0}")]
    DraftNotSaved(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// What a component shows the user. This crate never renders it itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserFacingError {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ClientError {
    /// Network failures, 5xx and rate limiting. The caller decides whether to retry.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Http(_) | ClientError::RateLimited { .. } => true,
            ClientError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ClientError::Http(_) => "NETWORK_ERROR",
            ClientError::Api { .. } => "API_ERROR",
            ClientError::Unauthorized => "UNAUTHORIZED",
            ClientError::NotFound(_) => "NOT_FOUND",
            ClientError::RateLimited { .. } => "RATE_LIMITED",
            ClientError::InvalidPayload(_) => "INVALID_PAYLOAD",
            ClientError::Validation(_) => "VALIDATION_ERROR",
            ClientError::DraftNotSaved(_) => "DRAFT_NOT_SAVED",
            ClientError::Storage(_) => "STORAGE_ERROR",
            ClientError::Json(_) => "JSON_ERROR",
            ClientError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn into_user_error(self) -> UserFacingError {
        let code = self.code();
        let (message, retry_after) = match &self {
            ClientError::Http(e) => {
                tracing::warn!("Network error: {e}");
                ("Could not reach the server".to_string(), None)
            }
            ClientError::Api { status, message } if *status < 500 => (message.clone(), None),
            ClientError::Api { status, message } => {
                tracing::error!("Server error {status}: {message}");
                ("The server failed to process the request".to_string(), None)
            }
            ClientError::Unauthorized => ("Please sign in to continue".to_string(), None),
            ClientError::NotFound(what) => (format!("{what} was not found"), None),
            ClientError::RateLimited { info } => (
                "Too many requests, please wait before trying again".to_string(),
                info.and_then(|i| i.retry_after),
            ),
            ClientError::InvalidPayload(msg) => {
                tracing::error!("Invalid payload: {msg}");
                ("The server returned an unexpected response".to_string(), None)
            }
            ClientError::Validation(msg) => (msg.clone(), None),
            ClientError::DraftNotSaved(msg) => {
                tracing::warn!("Draft not saved: {msg}");
                ("Changes not saved".to_string(), None)
            }
            ClientError::Storage(e) => {
                tracing::error!("Storage error: {e}");
                ("Changes not saved".to_string(), None)
            }
            ClientError::Json(e) => {
                tracing::error!("JSON error: {e}");
                ("The server returned an unexpected response".to_string(), None)
            }
            ClientError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                ("Something went wrong".to_string(), None)
            }
        };

        UserFacingError {
            code,
            message,
            retry_after,
        }
    }
}
