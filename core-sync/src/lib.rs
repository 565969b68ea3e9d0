//! # Catalog Sync
//!
//! Mirrors the media server catalog into the local cache.
//!
//! ## Overview
//!
//! - Full sync: clear the cache and reload every tracked item
//! - Incremental sync: upsert items changed since the last successful sync
//! - Purge: delete cached items the remote no longer lists
//!
//! ## Components
//!
//! - **Pipeline** (`pipeline`): fetch/persist stages joined by a bounded channel
//! - **Jobs** (`job`): job ids, modes, phases and run summaries
//! - **Sync Coordinator** (`coordinator`): one job at a time, events, deadline and cancellation

pub mod coordinator;
pub mod error;
pub mod job;
pub mod pipeline;

pub use coordinator::SyncCoordinator;
pub use error::{Result, SyncError};
pub use job::{
    ProgressSnapshot, PurgeSummary, SyncContext, SyncJobId, SyncMode, SyncPhase, SyncSummary,
};
pub use pipeline::{PipelineConfig, SyncPipeline};
