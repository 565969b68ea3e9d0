//! # Sync Pipeline
//!
//! Moves the remote catalog into the cache.
//!
//! ## Workflow
//!
//! ### Full Sync
//! 1. Drop secondary indexes (configurable) and clear items and seasons
//! 2. Page through every tracked item; a spawned fetch task hands fixed size
//!    batches to the caller's task over a bounded channel
//! 3. Upsert each batch in its own transaction
//! 4. Recreate secondary indexes (always, even when step 1, 2 or 3 failed or
//!    the sync future was dropped)
//! 5. Rebuild seasons and record the sync start instant
//!
//! ### Incremental Sync
//! Same streaming stages over the items changed since the last successful
//! sync, without clearing. Falls back to a full sync when there is no sync
//! state or the cache is empty. Deleted items are not detected here.
//!
//! ### Purge
//! Lists every remote id and deletes cached items that are no longer listed,
//! in bounded batches, then rebuilds seasons.
//!
//! Committed batches are never rolled back; a failed run leaves the cache
//! partially loaded until the next successful sync.

use crate::job::{PurgeSummary, SyncContext, SyncPhase, SyncSummary};
use crate::{Result, SyncError};
use bridge_traits::media_source::{ItemKind, ItemPage, RemoteItem, RemoteMediaSource};
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_library::repositories::{MediaItemRepository, UpsertOutcome};
use core_library::{CacheStore, MediaItem};
use core_runtime::config::SyncSettings;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Tuning knobs for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Items requested per remote page
    pub page_size: u32,
    /// Items per cache transaction
    pub batch_size: usize,
    /// Batches buffered between fetch and persist
    pub queue_capacity: usize,
    /// Ids per delete statement
    pub purge_batch_size: usize,
    /// Drop the media table's secondary indexes before a full sync's bulk
    /// insert; they are recreated afterwards either way
    pub drop_indexes_during_full_sync: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            page_size: 200,
            batch_size: 500,
            queue_capacity: 3,
            purge_batch_size: 500,
            drop_indexes_during_full_sync: true,
        }
    }
}

impl PipelineConfig {
    pub fn from_settings(settings: &SyncSettings, page_size: u32) -> Self {
        Self {
            page_size,
            batch_size: settings.batch_size,
            queue_capacity: settings.queue_capacity,
            purge_batch_size: settings.purge_batch_size,
            drop_indexes_during_full_sync: settings.drop_indexes_during_full_sync,
        }
    }

    fn normalized(mut self) -> Self {
        self.page_size = self.page_size.max(1);
        self.batch_size = self.batch_size.max(1);
        self.queue_capacity = self.queue_capacity.max(1);
        self.purge_batch_size = self.purge_batch_size.max(1);
        self
    }
}

/// Recreates the media table's secondary indexes once.
///
/// `run` rebuilds inline. A guard dropped before `run` finishes, as happens
/// when the sync future is dropped, spawns the rebuild on the current runtime.
struct IndexRebuild {
    media: Option<Arc<dyn MediaItemRepository>>,
}

impl IndexRebuild {
    fn arm(media: Arc<dyn MediaItemRepository>) -> Self {
        Self { media: Some(media) }
    }

    async fn run(mut self) -> core_library::Result<()> {
        let result = match &self.media {
            Some(media) => media.create_secondary_indexes().await,
            None => Ok(()),
        };
        self.media = None;
        result
    }
}

impl Drop for IndexRebuild {
    fn drop(&mut self) {
        let Some(media) = self.media.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("Full sync dropped before indexes were rebuilt, rebuilding in the background");
                handle.spawn(async move {
                    if let Err(e) = media.create_secondary_indexes().await {
                        warn!(error = %e, "Background index rebuild failed");
                    }
                });
            }
            Err(_) => warn!("No runtime to rebuild secondary indexes on, they stay dropped"),
        }
    }
}

/// Where the fetch stage reads from.
#[derive(Debug, Clone, Copy)]
enum FetchScope {
    Everything,
    ChangedSince(DateTime<Utc>),
}

/// One unit of work crossing the fetch/persist boundary.
struct FetchedBatch {
    items: Vec<RemoteItem>,
    /// Remote total for the scope, as reported by the latest page
    total: u64,
}

#[derive(Debug, Default)]
struct FetchStats {
    pages: u64,
    duplicates: u64,
}

#[derive(Debug, Default)]
struct PersistStats {
    processed: u64,
    outcome: UpsertOutcome,
}

#[derive(Clone)]
pub struct SyncPipeline {
    remote: Arc<dyn RemoteMediaSource>,
    store: CacheStore,
    events: EventBus,
    clock: Arc<dyn Clock>,
    config: PipelineConfig,
}

impl SyncPipeline {
    pub fn new(
        remote: Arc<dyn RemoteMediaSource>,
        store: CacheStore,
        events: EventBus,
        clock: Arc<dyn Clock>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            remote,
            store,
            events,
            clock,
            config: config.normalized(),
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Replace the cache contents with the remote catalog.
    #[instrument(skip(self, ctx), fields(job_id = %ctx.job_id))]
    pub async fn full_sync(&self, ctx: &SyncContext) -> Result<SyncSummary> {
        let started = Instant::now();
        let started_at = self.clock.now();
        ctx.ensure_active()?;

        let media = self.store.media_items();
        let indexes = IndexRebuild::arm(self.store.shared_media_items());
        if self.config.drop_indexes_during_full_sync {
            debug!("Dropping secondary indexes for bulk load");
            if let Err(e) = media.drop_secondary_indexes().await {
                if let Err(index_error) = indexes.run().await {
                    warn!(error = %index_error, "Failed to recreate secondary indexes after a failed drop");
                }
                return Err(e.into());
            }
        }

        let loaded = self.clear_and_load(ctx).await;

        self.emit_progress(ctx, SyncPhase::RebuildingIndexes, 0, 0);
        let reindexed = indexes.run().await;

        let stats = match (loaded, reindexed) {
            (Ok(stats), Ok(())) => stats,
            (Ok(_), Err(e)) => return Err(e.into()),
            (Err(e), reindexed) => {
                if let Err(index_error) = reindexed {
                    warn!(error = %index_error, "Failed to recreate secondary indexes after aborted sync");
                }
                return Err(e);
            }
        };

        let total_seasons = self.rebuild_seasons(ctx).await?;
        self.store.sync_state().set_last_synced_at(started_at).await?;
        let total_items = media.count().await? as u64;

        info!(
            total_items,
            total_seasons,
            processed = stats.processed,
            "Full sync finished"
        );

        Ok(SyncSummary {
            job_id: ctx.job_id,
            total_items,
            total_seasons,
            new_items: 0,
            updated_items: 0,
            is_incremental: false,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Upsert items changed since the last successful sync.
    ///
    /// Runs a full sync instead when there is nothing to be incremental from.
    #[instrument(skip(self, ctx), fields(job_id = %ctx.job_id))]
    pub async fn incremental_sync(&self, ctx: &SyncContext) -> Result<SyncSummary> {
        let last_synced_at = self.store.sync_state().last_synced_at().await?;
        let cached = self.store.media_items().count().await?;

        let since = match last_synced_at {
            Some(since) if cached > 0 => since,
            Some(_) => {
                info!("Cache is empty, falling back to full sync");
                return self.full_sync(ctx).await;
            }
            None => {
                info!("No previous sync recorded, falling back to full sync");
                return self.full_sync(ctx).await;
            }
        };

        let started = Instant::now();
        let started_at = self.clock.now();
        ctx.ensure_active()?;

        info!(since = %since, "Fetching items changed since last sync");
        let stats = self.stream(ctx, FetchScope::ChangedSince(since)).await?;

        let total_seasons = self.rebuild_seasons(ctx).await?;
        self.store.sync_state().set_last_synced_at(started_at).await?;
        let total_items = self.store.media_items().count().await? as u64;

        info!(
            new_items = stats.outcome.inserted,
            updated_items = stats.outcome.updated,
            total_seasons,
            "Incremental sync finished"
        );

        Ok(SyncSummary {
            job_id: ctx.job_id,
            total_items,
            total_seasons,
            new_items: stats.outcome.inserted,
            updated_items: stats.outcome.updated,
            is_incremental: true,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Delete cached items the remote no longer lists.
    #[instrument(skip(self, ctx), fields(job_id = %ctx.job_id))]
    pub async fn purge_deleted(&self, ctx: &SyncContext) -> Result<PurgeSummary> {
        let started = Instant::now();
        ctx.ensure_active()?;

        self.emit_progress(ctx, SyncPhase::ListingIds, 0, 0);
        let remote_ids = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(SyncError::Cancelled),
            ids = self.remote.list_all_ids(&ItemKind::TRACKED) => ids?,
        };

        let local_ids = self.store.media_items().all_ids().await?;

        if remote_ids.is_empty() && !local_ids.is_empty() {
            warn!(
                local_count = local_ids.len(),
                "Remote listed no items, refusing to purge the cache"
            );
            return Err(SyncError::PurgeRefused {
                local_count: local_ids.len(),
            });
        }

        let remote: HashSet<&str> = remote_ids.iter().map(String::as_str).collect();
        let stale: Vec<String> = local_ids
            .iter()
            .filter(|id| !remote.contains(id.as_str()))
            .cloned()
            .collect();

        info!(
            remote_count = remote_ids.len(),
            local_count = local_ids.len(),
            stale = stale.len(),
            "Purging items missing from the remote"
        );

        let mut deleted = 0u64;
        for chunk in stale.chunks(self.config.purge_batch_size) {
            ctx.ensure_active()?;
            deleted += self.store.media_items().delete_by_ids(chunk).await?;
            self.emit_progress(ctx, SyncPhase::Purging, deleted, stale.len() as u64);
        }

        let total_seasons = self.rebuild_seasons(ctx).await?;

        Ok(PurgeSummary {
            job_id: ctx.job_id,
            remote_count: remote_ids.len() as u64,
            local_count: local_ids.len() as u64,
            deleted,
            total_seasons,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn clear_and_load(&self, ctx: &SyncContext) -> Result<PersistStats> {
        self.emit_progress(ctx, SyncPhase::Preparing, 0, 0);
        self.store.seasons().clear().await?;
        let cleared = self.store.media_items().clear().await?;
        debug!(cleared, "Cleared cached items");

        self.stream(ctx, FetchScope::Everything).await
    }

    async fn rebuild_seasons(&self, ctx: &SyncContext) -> Result<u64> {
        ctx.ensure_active()?;
        self.emit_progress(ctx, SyncPhase::RebuildingSeasons, 0, 0);
        Ok(self.store.seasons().rebuild_from_media().await?)
    }

    /// Run the fetch stage on a spawned task and persist on this one.
    async fn stream(&self, ctx: &SyncContext, scope: FetchScope) -> Result<PersistStats> {
        self.emit_progress(ctx, SyncPhase::Fetching, 0, 0);
        let (sender, mut receiver) = mpsc::channel::<FetchedBatch>(self.config.queue_capacity);
        let producer_cancel = ctx.cancel.child_token();

        let producer = tokio::spawn(fetch_batches(
            Arc::clone(&self.remote),
            scope,
            self.config.page_size,
            self.config.batch_size,
            sender,
            producer_cancel.clone(),
        ));

        let persisted = self.persist_batches(ctx, &mut receiver).await;

        if persisted.is_err() {
            producer_cancel.cancel();
        }
        // Unblocks a producer waiting on a full channel.
        drop(receiver);

        let fetched = producer
            .await
            .map_err(|e| SyncError::Internal(format!("Fetch task failed: {e}")))?;

        match (persisted, fetched) {
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e),
            (Ok(stats), Ok(fetch)) => {
                ctx.ensure_active()?;
                debug!(
                    pages = fetch.pages,
                    duplicates = fetch.duplicates,
                    processed = stats.processed,
                    "Stream drained"
                );
                Ok(stats)
            }
        }
    }

    async fn persist_batches(
        &self,
        ctx: &SyncContext,
        receiver: &mut mpsc::Receiver<FetchedBatch>,
    ) -> Result<PersistStats> {
        let mut stats = PersistStats::default();

        loop {
            let batch = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(SyncError::Cancelled),
                batch = receiver.recv() => batch,
            };
            let Some(batch) = batch else { break };

            let cached_at = self.clock.unix_timestamp();
            let records: Vec<MediaItem> = batch
                .items
                .into_iter()
                .map(|item| MediaItem::from_remote(item, cached_at))
                .collect();

            let outcome = self.store.media_items().upsert_batch(&records).await?;
            stats.processed += records.len() as u64;
            stats.outcome += outcome;

            debug!(
                batch = records.len(),
                processed = stats.processed,
                total = batch.total,
                "Committed batch"
            );
            self.emit_progress(ctx, SyncPhase::Persisting, stats.processed, batch.total);
        }

        Ok(stats)
    }

    fn emit_progress(&self, ctx: &SyncContext, phase: SyncPhase, processed: u64, total: u64) {
        ctx.record_progress(phase, processed);
        self.events
            .emit(CoreEvent::Sync(SyncEvent::Progress {
                job_id: ctx.job_id.to_string(),
                phase: phase.to_string(),
                processed,
                total,
            }))
            .ok();
    }
}

/// Page through the remote and send deduplicated, fixed size batches.
///
/// `start_index` advances by what the server consumed, not by what survived
/// the connector's filtering, and a page shorter than requested is not taken
/// as the end of the listing.
async fn fetch_batches(
    remote: Arc<dyn RemoteMediaSource>,
    scope: FetchScope,
    page_size: u32,
    batch_size: usize,
    sender: mpsc::Sender<FetchedBatch>,
    cancel: core_async::CancellationToken,
) -> Result<FetchStats> {
    let mut stats = FetchStats::default();
    let mut seen: HashSet<String> = HashSet::new();
    let mut batch: Vec<RemoteItem> = Vec::with_capacity(batch_size);
    let mut start_index = 0u64;
    let mut total = 0u64;

    loop {
        let request = async {
            match scope {
                FetchScope::Everything => {
                    remote
                        .page_items(&ItemKind::TRACKED, start_index, page_size)
                        .await
                }
                FetchScope::ChangedSince(since) => {
                    remote
                        .changed_since(since, &ItemKind::TRACKED, start_index, page_size)
                        .await
                }
            }
        };

        let page: ItemPage = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            page = request => page?,
        };

        stats.pages += 1;
        total = page.total_count;
        let last_page = page.is_last(start_index);
        start_index = page.next_start(start_index);

        for item in page.items {
            if !seen.insert(item.id.clone()) {
                stats.duplicates += 1;
                continue;
            }
            batch.push(item);

            if batch.len() == batch_size {
                let items = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                if sender.send(FetchedBatch { items, total }).await.is_err() {
                    // Persist stage stopped; its error is the one reported.
                    return Ok(stats);
                }
            }
        }

        if last_page {
            break;
        }
    }

    if !batch.is_empty() && sender.send(FetchedBatch { items: batch, total }).await.is_err() {
        return Ok(stats);
    }

    Ok(stats)
}
