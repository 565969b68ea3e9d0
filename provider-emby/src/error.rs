//! Error types for the Emby provider

use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbyError {
    /// API key missing, wrong or revoked (401/403)
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Emby API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after_seconds: Option<u64> },

    #[error("Item not found: {item_id}")]
    ItemNotFound { item_id: String },

    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, EmbyError>;

impl EmbyError {
    /// Classify a non-success response.
    pub fn from_status(status_code: u16, context: &str, body: &str) -> Self {
        match status_code {
            401 | 403 => EmbyError::AuthenticationFailed(format!("{context}: status {status_code}")),
            404 => EmbyError::ItemNotFound {
                item_id: context.to_string(),
            },
            _ => EmbyError::ApiError {
                status_code,
                message: if body.is_empty() {
                    context.to_string()
                } else {
                    format!("{context}: {body}")
                },
            },
        }
    }
}

impl From<EmbyError> for BridgeError {
    fn from(error: EmbyError) -> Self {
        match error {
            EmbyError::AuthenticationFailed(msg) => BridgeError::Authentication(msg),
            EmbyError::RateLimitExceeded {
                retry_after_seconds,
            } => BridgeError::RateLimited {
                retry_after_secs: retry_after_seconds,
            },
            EmbyError::ItemNotFound { item_id } => BridgeError::NotFound(item_id),
            EmbyError::ApiError { .. } | EmbyError::ParseError(_) => {
                BridgeError::OperationFailed(error.to_string())
            }
            EmbyError::Bridge(e) => e,
        }
    }
}
