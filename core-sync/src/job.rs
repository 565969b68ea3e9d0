//! # Sync Jobs
//!
//! Identity, mode and outcome types shared by the pipeline and the
//! coordinator.
//!
//! Each run of the pipeline is a job with a fresh [`SyncJobId`]. Progress and
//! terminal events carry that id so subscribers can follow one run among
//! several.

use crate::{Result, SyncError};
use core_async::CancellationToken;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// Unique identifier for a sync job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncJobId(Uuid);

impl SyncJobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| SyncError::Internal(format!("Invalid job id {s}: {e}")))
    }
}

impl Default for SyncJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SyncJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a sync job does to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Clear the cache and reload every tracked item
    Full,
    /// Upsert items changed since the last successful sync
    Incremental,
    /// Delete cached items the remote no longer lists
    Purge,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Incremental => "incremental",
            SyncMode::Purge => "purge",
        }
    }
}

impl FromStr for SyncMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(SyncMode::Full),
            "incremental" => Ok(SyncMode::Incremental),
            "purge" => Ok(SyncMode::Purge),
            _ => Err(SyncError::Internal(format!("Unknown sync mode: {s}"))),
        }
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage of a running job, reported in progress and terminal events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Preparing,
    Fetching,
    Persisting,
    RebuildingIndexes,
    RebuildingSeasons,
    ListingIds,
    Purging,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Preparing => "preparing",
            SyncPhase::Fetching => "fetching",
            SyncPhase::Persisting => "persisting",
            SyncPhase::RebuildingIndexes => "rebuilding_indexes",
            SyncPhase::RebuildingSeasons => "rebuilding_seasons",
            SyncPhase::ListingIds => "listing_ids",
            SyncPhase::Purging => "purging",
        }
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last progress reported by a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub phase: SyncPhase,
    pub processed: u64,
}

/// Per-job handle passed down into the pipeline.
#[derive(Debug, Clone)]
pub struct SyncContext {
    pub job_id: SyncJobId,
    pub cancel: CancellationToken,
    progress: Arc<Mutex<ProgressSnapshot>>,
}

impl SyncContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            job_id: SyncJobId::new(),
            cancel,
            progress: Arc::new(Mutex::new(ProgressSnapshot {
                phase: SyncPhase::Preparing,
                processed: 0,
            })),
        }
    }

    pub fn progress(&self) -> ProgressSnapshot {
        *self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn record_progress(&self, phase: SyncPhase, processed: u64) {
        let mut progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
        progress.phase = phase;
        // Phases without a counter keep the last item count.
        if processed > 0 {
            progress.processed = processed;
        }
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Outcome of a full or incremental sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub job_id: SyncJobId,
    /// Media items in the cache after the run
    pub total_items: u64,
    /// Season rows after the rebuild
    pub total_seasons: u64,
    /// Incremental runs only
    pub new_items: u64,
    /// Incremental runs only
    pub updated_items: u64,
    /// False when an incremental request fell back to a full sync
    pub is_incremental: bool,
    pub elapsed_ms: u64,
}

/// Outcome of deleted-item detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeSummary {
    pub job_id: SyncJobId,
    pub remote_count: u64,
    pub local_count: u64,
    pub deleted: u64,
    pub total_seasons: u64,
    pub elapsed_ms: u64,
}
