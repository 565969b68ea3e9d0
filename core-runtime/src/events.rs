//! # Event Bus System
//!
//! Progress reporting for long running catalog operations, built on
//! `tokio::sync::broadcast`.
//!
//! Every sync job publishes an ordered sequence of [`SyncEvent`]s under one
//! `job_id`: `Started`, zero or more `Progress` events (one per committed
//! batch), then exactly one terminal event: `Completed`, `Failed` or
//! `Cancelled`. Analysis runs publish [`AnalysisEvent`]s.
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Sync(SyncEvent::Progress {
//!         job_id: "job-1".to_string(),
//!         phase: "persisting".to_string(),
//!         processed: 500,
//!         total: 1200,
//!     }))
//!     .ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert!(!event.is_done());
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber fell behind and missed `n` events.
//! - **`RecvError::Closed`**: all senders were dropped.
//!
//! Publishers ignore "no subscribers" errors (`emit(..).ok()`); progress is
//! advisory and never affects the operation being reported.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published through the event bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Catalog synchronization events
    Sync(SyncEvent),
    /// Reconciliation analysis events
    Analysis(AnalysisEvent),
}

impl CoreEvent {
    /// True for the last event of an operation.
    pub fn is_done(&self) -> bool {
        match self {
            CoreEvent::Sync(e) => e.is_done(),
            CoreEvent::Analysis(e) => e.is_done(),
        }
    }
}

// ============================================================================
// Sync Events
// ============================================================================

/// Lifecycle of one sync job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// Sync job initiated.
    Started {
        job_id: String,
        /// "full", "incremental" or "purge"
        mode: String,
    },
    /// Emitted once per committed batch.
    Progress {
        job_id: String,
        /// Current phase (e.g. "fetching", "persisting", "rebuilding_seasons").
        phase: String,
        /// Items committed so far.
        processed: u64,
        /// Items the remote reported for this run; 0 when unknown.
        total: u64,
    },
    /// Sync finished successfully.
    Completed {
        job_id: String,
        total_items: u64,
        total_seasons: u64,
        /// Incremental runs only
        new_items: u64,
        /// Incremental runs only
        updated_items: u64,
        /// Purge runs only
        deleted_items: u64,
        is_incremental: bool,
        elapsed_ms: u64,
    },
    /// Sync stopped on an error. Committed batches stay committed.
    Failed {
        job_id: String,
        phase: String,
        processed: u64,
        message: String,
        /// Whether retrying the same request can succeed.
        recoverable: bool,
    },
    /// Sync stopped because its cancellation token fired.
    Cancelled {
        job_id: String,
        phase: String,
        processed: u64,
        /// Set when the cancellation came from the sync deadline.
        timed_out: bool,
    },
}

impl SyncEvent {
    pub fn job_id(&self) -> &str {
        match self {
            SyncEvent::Started { job_id, .. }
            | SyncEvent::Progress { job_id, .. }
            | SyncEvent::Completed { job_id, .. }
            | SyncEvent::Failed { job_id, .. }
            | SyncEvent::Cancelled { job_id, .. } => job_id,
        }
    }

    pub fn phase(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "starting",
            SyncEvent::Progress { phase, .. }
            | SyncEvent::Failed { phase, .. }
            | SyncEvent::Cancelled { phase, .. } => phase,
            SyncEvent::Completed { .. } => "completed",
        }
    }

    pub fn processed(&self) -> u64 {
        match self {
            SyncEvent::Started { .. } => 0,
            SyncEvent::Progress { processed, .. }
            | SyncEvent::Failed { processed, .. }
            | SyncEvent::Cancelled { processed, .. } => *processed,
            SyncEvent::Completed { total_items, .. } => *total_items,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(
            self,
            SyncEvent::Completed { .. } | SyncEvent::Failed { .. } | SyncEvent::Cancelled { .. }
        )
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            SyncEvent::Failed { message, .. } => Some(message),
            SyncEvent::Cancelled {
                timed_out: true, ..
            } => Some("sync timed out"),
            SyncEvent::Cancelled { .. } => Some("sync cancelled"),
            _ => None,
        }
    }
}

// ============================================================================
// Analysis Events
// ============================================================================

/// Reconciliation analysis runs (duplicates, scrape, episode mapping).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AnalysisEvent {
    Started {
        kind: String,
    },
    Progress {
        kind: String,
        processed: u64,
        total: u64,
    },
    Completed {
        kind: String,
        anomalies: u64,
        elapsed_ms: u64,
    },
    Failed {
        kind: String,
        message: String,
    },
}

impl AnalysisEvent {
    pub fn is_done(&self) -> bool {
        matches!(
            self,
            AnalysisEvent::Completed { .. } | AnalysisEvent::Failed { .. }
        )
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Clone it to get additional producers; each `subscribe()` call creates an
/// independent receiver. Slow subscribers get `RecvError::Lagged` instead of
/// blocking publishers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
