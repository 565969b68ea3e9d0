//! Bounded-concurrency task execution for the catalog core.
//!
//! [`WorkerPool`] runs independent async tasks (typically remote lookups) on a
//! set of tokio workers that grows from `min_workers` up to `max_workers` under
//! load and shrinks back after an idle timeout. Cancellation is cooperative
//! and graceful: new submissions are dropped, queued work is drained.
//!
//! ```ignore
//! use core_async::{CancellationToken, WorkerPool, WorkerPoolConfig};
//!
//! let pool = WorkerPool::new(WorkerPoolConfig::new(2, 8), CancellationToken::new())?;
//! for show_id in show_ids {
//!     let source = source.clone();
//!     pool.submit(move || async move { Ok(source.fetch_show_seasons(&show_id).await?) })
//!         .await;
//! }
//! let results = pool.wait().await;
//! ```

pub mod error;
pub mod pool;

pub use error::{PoolError, TaskError};
pub use pool::{TaskResult, WorkerPool, WorkerPoolConfig};
pub use tokio_util::sync::CancellationToken;
