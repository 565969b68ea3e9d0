use core_async::PoolError;
use core_library::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Cache access failed: {0}")]
    Library(#[from] LibraryError),

    #[error("Metadata provider rejected {consecutive} consecutive requests, scan aborted")]
    AuthenticationAborted { consecutive: u32 },

    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Analysis cancelled")]
    Cancelled,

    #[error("Analysis not configured: {0}")]
    NotConfigured(String),
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
