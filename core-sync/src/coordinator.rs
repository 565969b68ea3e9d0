//! # Sync Coordinator
//!
//! Runs pipeline jobs one at a time against a single cache.
//!
//! ## Overview
//!
//! The `SyncCoordinator` wraps a [`SyncPipeline`] with job bookkeeping:
//! - Single writer: a second job while one runs fails with `SyncInProgress`
//! - Job ids, `Started` and terminal events on the `EventBus`
//! - A sync deadline that cancels the job's token and reports `Timeout`
//! - External cancellation through [`SyncCoordinator::cancel`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! let coordinator = SyncCoordinator::new(pipeline, event_bus, Some(Duration::from_secs(3600)));
//!
//! let summary = coordinator.incremental_sync().await?;
//! println!("{} new, {} updated", summary.new_items, summary.updated_items);
//!
//! // Fire and forget; follow the job through the event bus.
//! let job_id = coordinator.start(SyncMode::Full)?;
//! ```

use crate::job::{PurgeSummary, SyncContext, SyncJobId, SyncMode, SyncSummary};
use crate::pipeline::SyncPipeline;
use crate::{Result, SyncError};
use core_async::CancellationToken;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Job currently holding the writer slot.
#[derive(Clone)]
struct ActiveSync {
    job_id: SyncJobId,
    mode: SyncMode,
    cancel: CancellationToken,
}

type ActiveSlot = Arc<Mutex<Option<ActiveSync>>>;

fn lock(slot: &ActiveSlot) -> MutexGuard<'_, Option<ActiveSync>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Releases the writer slot when the job ends, including on panic.
struct SlotGuard {
    slot: ActiveSlot,
    job_id: SyncJobId,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut active = lock(&self.slot);
        if active.as_ref().is_some_and(|job| job.job_id == self.job_id) {
            *active = None;
        }
    }
}

/// Outcomes that can be reported as a `Completed` event.
trait JobOutcome {
    fn completed_event(&self) -> SyncEvent;
}

impl JobOutcome for SyncSummary {
    fn completed_event(&self) -> SyncEvent {
        SyncEvent::Completed {
            job_id: self.job_id.to_string(),
            total_items: self.total_items,
            total_seasons: self.total_seasons,
            new_items: self.new_items,
            updated_items: self.updated_items,
            deleted_items: 0,
            is_incremental: self.is_incremental,
            elapsed_ms: self.elapsed_ms,
        }
    }
}

impl JobOutcome for PurgeSummary {
    fn completed_event(&self) -> SyncEvent {
        SyncEvent::Completed {
            job_id: self.job_id.to_string(),
            total_items: self.local_count.saturating_sub(self.deleted),
            total_seasons: self.total_seasons,
            new_items: 0,
            updated_items: 0,
            deleted_items: self.deleted,
            is_incremental: false,
            elapsed_ms: self.elapsed_ms,
        }
    }
}

#[derive(Clone)]
pub struct SyncCoordinator {
    pipeline: SyncPipeline,
    events: EventBus,
    /// `None` disables the deadline
    timeout: Option<Duration>,
    active: ActiveSlot,
}

impl SyncCoordinator {
    pub fn new(pipeline: SyncPipeline, events: EventBus, timeout: Option<Duration>) -> Self {
        Self {
            pipeline,
            events,
            timeout,
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn pipeline(&self) -> &SyncPipeline {
        &self.pipeline
    }

    pub fn is_running(&self) -> bool {
        lock(&self.active).is_some()
    }

    /// Id and mode of the running job, if any.
    pub fn active_job(&self) -> Option<(SyncJobId, SyncMode)> {
        lock(&self.active)
            .as_ref()
            .map(|job| (job.job_id, job.mode))
    }

    /// Cancel the running job. Returns false when nothing was running.
    pub fn cancel(&self) -> bool {
        match lock(&self.active).as_ref() {
            Some(job) => {
                info!(job_id = %job.job_id, "Cancelling sync job");
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    #[instrument(skip(self))]
    pub async fn full_sync(&self) -> Result<SyncSummary> {
        let (ctx, guard) = self.reserve(SyncMode::Full)?;
        let pipeline = self.pipeline.clone();
        self.drive(ctx, guard, SyncMode::Full, |ctx| async move {
            pipeline.full_sync(&ctx).await
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn incremental_sync(&self) -> Result<SyncSummary> {
        let (ctx, guard) = self.reserve(SyncMode::Incremental)?;
        let pipeline = self.pipeline.clone();
        self.drive(ctx, guard, SyncMode::Incremental, |ctx| async move {
            pipeline.incremental_sync(&ctx).await
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn purge_deleted(&self) -> Result<PurgeSummary> {
        let (ctx, guard) = self.reserve(SyncMode::Purge)?;
        let pipeline = self.pipeline.clone();
        self.drive(ctx, guard, SyncMode::Purge, |ctx| async move {
            pipeline.purge_deleted(&ctx).await
        })
        .await
    }

    /// Start a job in the background and return its id immediately.
    ///
    /// The outcome is only reported through the event bus.
    pub fn start(&self, mode: SyncMode) -> Result<SyncJobId> {
        let (ctx, guard) = self.reserve(mode)?;
        let job_id = ctx.job_id;
        let coordinator = self.clone();

        tokio::spawn(async move {
            let pipeline = coordinator.pipeline.clone();
            let outcome = match mode {
                SyncMode::Full => coordinator
                    .drive(ctx, guard, mode, |ctx| async move { pipeline.full_sync(&ctx).await })
                    .await
                    .map(|_| ()),
                SyncMode::Incremental => coordinator
                    .drive(ctx, guard, mode, |ctx| async move {
                        pipeline.incremental_sync(&ctx).await
                    })
                    .await
                    .map(|_| ()),
                SyncMode::Purge => coordinator
                    .drive(ctx, guard, mode, |ctx| async move {
                        pipeline.purge_deleted(&ctx).await
                    })
                    .await
                    .map(|_| ()),
            };

            if let Err(e) = outcome {
                error!(job_id = %job_id, error = %e, "Background sync job failed");
            }
        });

        Ok(job_id)
    }

    /// Claim the writer slot for a new job.
    fn reserve(&self, mode: SyncMode) -> Result<(SyncContext, SlotGuard)> {
        let mut active = lock(&self.active);
        if let Some(running) = active.as_ref() {
            warn!(
                running_job = %running.job_id,
                running_mode = %running.mode,
                requested_mode = %mode,
                "Rejecting sync request while another job is running"
            );
            return Err(SyncError::SyncInProgress {
                job_id: running.job_id.to_string(),
            });
        }

        let ctx = SyncContext::new(CancellationToken::new());
        *active = Some(ActiveSync {
            job_id: ctx.job_id,
            mode,
            cancel: ctx.cancel.clone(),
        });

        let guard = SlotGuard {
            slot: Arc::clone(&self.active),
            job_id: ctx.job_id,
        };
        Ok((ctx, guard))
    }

    async fn drive<T, F, Fut>(
        &self,
        ctx: SyncContext,
        guard: SlotGuard,
        mode: SyncMode,
        job: F,
    ) -> Result<T>
    where
        T: JobOutcome,
        F: FnOnce(SyncContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let job_id = ctx.job_id;
        info!(job_id = %job_id, mode = %mode, "Sync job started");
        self.emit(SyncEvent::Started {
            job_id: job_id.to_string(),
            mode: mode.to_string(),
        });

        let timed_out = Arc::new(AtomicBool::new(false));
        let finished = CancellationToken::new();
        if let Some(limit) = self.timeout {
            tokio::spawn(enforce_deadline(
                limit,
                ctx.cancel.clone(),
                finished.clone(),
                Arc::clone(&timed_out),
            ));
        }

        let result = job(ctx.clone()).await;
        finished.cancel();
        drop(guard);

        let result = match result {
            Err(SyncError::Cancelled) if timed_out.load(Ordering::SeqCst) => {
                let secs = self.timeout.map(|limit| limit.as_secs()).unwrap_or_default();
                Err(SyncError::Timeout(secs))
            }
            other => other,
        };

        let progress = ctx.progress();
        match &result {
            Ok(outcome) => {
                info!(job_id = %job_id, mode = %mode, "Sync job completed");
                self.emit(outcome.completed_event());
            }
            Err(e) if e.is_cancellation() => {
                warn!(job_id = %job_id, phase = %progress.phase, error = %e, "Sync job stopped");
                self.emit(SyncEvent::Cancelled {
                    job_id: job_id.to_string(),
                    phase: progress.phase.to_string(),
                    processed: progress.processed,
                    timed_out: matches!(e, SyncError::Timeout(_)),
                });
            }
            Err(e) => {
                error!(job_id = %job_id, phase = %progress.phase, error = %e, "Sync job failed");
                self.emit(SyncEvent::Failed {
                    job_id: job_id.to_string(),
                    phase: progress.phase.to_string(),
                    processed: progress.processed,
                    message: e.to_string(),
                    recoverable: e.is_recoverable(),
                });
            }
        }

        result
    }

    fn emit(&self, event: SyncEvent) {
        self.events.emit(CoreEvent::Sync(event)).ok();
    }
}

async fn enforce_deadline(
    limit: Duration,
    cancel: CancellationToken,
    finished: CancellationToken,
    timed_out: Arc<AtomicBool>,
) {
    tokio::select! {
        _ = tokio::time::sleep(limit) => {
            warn!(timeout_secs = limit.as_secs(), "Sync deadline reached, cancelling job");
            timed_out.store(true, Ordering::SeqCst);
            cancel.cancel();
        }
        _ = finished.cancelled() => {}
        _ = cancel.cancelled() => {}
    }
}
