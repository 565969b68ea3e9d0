use thiserror::Error;

/// Errors raised while assembling the runtime: configuration, logging and
/// missing host capabilities.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or unreadable configuration, or a second logging init
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
