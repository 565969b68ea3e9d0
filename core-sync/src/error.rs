use bridge_traits::error::BridgeError;
use core_library::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Remote media server error: {0}")]
    Remote(BridgeError),

    #[error("Remote media server rejected credentials: {0}")]
    Authentication(String),

    #[error("Cache persistence failed: {0}")]
    Persistence(#[from] LibraryError),

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Sync timeout after {0} seconds")]
    Timeout(u64),

    #[error("Sync already in progress (job {job_id})")]
    SyncInProgress { job_id: String },

    #[error("Refusing to purge: remote listed no items but the cache holds {local_count}")]
    PurgeRefused { local_count: usize },

    #[error("Internal sync error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Whether retrying the same operation later can succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            SyncError::Remote(e) => e.is_retryable(),
            SyncError::Persistence(_) | SyncError::Timeout(_) | SyncError::SyncInProgress { .. } => {
                true
            }
            SyncError::Authentication(_)
            | SyncError::Cancelled
            | SyncError::PurgeRefused { .. }
            | SyncError::Internal(_) => false,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, SyncError::Cancelled | SyncError::Timeout(_))
    }
}

impl From<BridgeError> for SyncError {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::Authentication(message) => SyncError::Authentication(message),
            other => SyncError::Remote(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
