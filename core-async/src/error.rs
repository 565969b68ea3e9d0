use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Invalid worker pool configuration: {0}")]
    InvalidConfig(String),
}

/// Failure of a single pooled task. Never affects sibling tasks.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Task failed: {0:#}")]
    Failed(anyhow::Error),

    #[error("Task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub fn is_panic(&self) -> bool {
        matches!(self, TaskError::Panicked(_))
    }

    /// Look for a typed error inside a failed task's error chain.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        match self {
            TaskError::Failed(error) => error.downcast_ref::<E>(),
            TaskError::Panicked(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;
