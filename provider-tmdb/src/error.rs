//! Error types for the TMDB provider

use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TmdbError {
    /// Missing, invalid or suspended credentials (401/403)
    #[error("TMDB authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Still rate limited after the last attempt
    #[error("TMDB rate limit exceeded after {attempts} attempts")]
    RateLimited {
        attempts: u32,
        retry_after_seconds: Option<u64>,
    },

    #[error("TMDB show not found: {show_id}")]
    ShowNotFound { show_id: String },

    #[error("TMDB API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    #[error("Failed to parse TMDB response: {0}")]
    ParseError(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, TmdbError>;

impl From<TmdbError> for BridgeError {
    fn from(error: TmdbError) -> Self {
        match error {
            TmdbError::AuthenticationFailed(msg) => BridgeError::Authentication(msg),
            TmdbError::RateLimited {
                retry_after_seconds,
                ..
            } => BridgeError::RateLimited {
                retry_after_secs: retry_after_seconds,
            },
            TmdbError::ShowNotFound { show_id } => BridgeError::NotFound(show_id),
            TmdbError::ApiError { .. } | TmdbError::ParseError(_) => {
                BridgeError::OperationFailed(error.to_string())
            }
            TmdbError::Bridge(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_conversion_keeps_auth_signal() {
        let bridge: BridgeError = TmdbError::AuthenticationFailed("status 401".into()).into();
        assert!(bridge.is_authentication());

        let bridge: BridgeError = TmdbError::RateLimited {
            attempts: 3,
            retry_after_seconds: Some(10),
        }
        .into();
        assert!(matches!(
            bridge,
            BridgeError::RateLimited {
                retry_after_secs: Some(10)
            }
        ));
    }
}
