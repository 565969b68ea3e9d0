//! # Episode Mapping Scan
//!
//! Fetches provider season lists for every series with a TMDB id, caches
//! them, and compares them with the local season aggregates.
//!
//! ## Workflow
//!
//! 1. Collect series with a TMDB id and split their show ids into cached and
//!    not yet fetched
//! 2. Fetch the missing shows on a [`WorkerPool`]; each success is written to
//!    the snapshot cache straight away, so an aborted scan keeps its progress
//! 3. Stop the pool after too many consecutive authentication failures
//! 4. Run the detector over every show that has a snapshot and replace the
//!    anomaly table
//!
//! Failures other than authentication skip the show and are counted.

use crate::episode_mapping::{detect_episode_mapping_anomalies, ShowSnapshot};
use crate::error::{ReconcileError, Result};
use anyhow::anyhow;
use bridge_traits::metadata_source::ExternalMetadataSource;
use core_async::{CancellationToken, WorkerPool, WorkerPoolConfig};
use core_library::{CacheStore, EpisodeMappingAnomaly, ExternalSeasonSnapshot};
use core_runtime::events::{AnalysisEvent, CoreEvent, EventBus};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub(crate) const KIND: &str = "episode_mapping";

/// Outcome of one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    /// Series compared against the provider
    pub shows_scanned: usize,
    /// Shows fetched from the provider during this scan
    pub fetched: usize,
    /// Shows served from the snapshot cache
    pub cached: usize,
    /// Shows whose lookup failed and were skipped
    pub failed: usize,
    pub anomalies: Vec<EpisodeMappingAnomaly>,
}

#[derive(Debug, Default)]
struct FetchOutcome {
    fetched: usize,
    failed: usize,
    aborted: bool,
}

/// Auth failure bookkeeping for one scan invocation.
struct AuthGuard {
    consecutive: AtomicU32,
    aborted: AtomicBool,
    threshold: u32,
}

impl AuthGuard {
    fn new(threshold: u32) -> Self {
        Self {
            consecutive: AtomicU32::new(0),
            aborted: AtomicBool::new(false),
            threshold: threshold.max(1),
        }
    }

    fn record_success(&self) {
        self.consecutive.store(0, Ordering::SeqCst);
    }

    /// Returns true exactly once, when the threshold is first reached.
    fn record_auth_failure(&self) -> bool {
        let failures = self.consecutive.fetch_add(1, Ordering::SeqCst) + 1;
        failures >= self.threshold && !self.aborted.swap(true, Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct EpisodeMappingScanner {
    store: CacheStore,
    source: Arc<dyn ExternalMetadataSource>,
    events: EventBus,
    pool_config: WorkerPoolConfig,
    max_consecutive_auth_failures: u32,
}

impl EpisodeMappingScanner {
    pub fn new(
        store: CacheStore,
        source: Arc<dyn ExternalMetadataSource>,
        events: EventBus,
        pool_config: WorkerPoolConfig,
        max_consecutive_auth_failures: u32,
    ) -> Self {
        Self {
            store,
            source,
            events,
            pool_config,
            max_consecutive_auth_failures,
        }
    }

    #[instrument(skip(self, cancel))]
    pub async fn scan(&self, cancel: &CancellationToken) -> Result<ScanSummary> {
        let series = self.store.media_items().find_series_with_tmdb_id().await?;

        let show_ids: BTreeSet<String> = series
            .iter()
            .filter_map(|item| item.tmdb_id().map(str::to_string))
            .collect();

        let mut snapshots: HashMap<String, Vec<ExternalSeasonSnapshot>> = HashMap::new();
        let mut pending = Vec::new();
        for show_id in show_ids {
            match self.store.metadata_snapshots().find_show(&show_id).await? {
                Some(seasons) => {
                    snapshots.insert(show_id, seasons);
                }
                None => pending.push(show_id),
            }
        }
        let cached = snapshots.len();

        info!(
            series = series.len(),
            cached,
            pending = pending.len(),
            "Starting episode mapping scan"
        );

        let outcome = self.fetch_missing(pending.clone(), cancel).await?;
        if outcome.aborted {
            return Err(ReconcileError::AuthenticationAborted {
                consecutive: self.max_consecutive_auth_failures.max(1),
            });
        }
        if cancel.is_cancelled() {
            return Err(ReconcileError::Cancelled);
        }

        for show_id in pending {
            if let Some(seasons) = self.store.metadata_snapshots().find_show(&show_id).await? {
                snapshots.insert(show_id, seasons);
            }
        }

        let mut shows = Vec::with_capacity(series.len());
        for item in &series {
            let Some(show_id) = item.tmdb_id() else { continue };
            let Some(external) = snapshots.get(show_id) else { continue };
            let local_seasons = self.store.seasons().find_by_series(&item.id).await?;
            shows.push(ShowSnapshot {
                show_id: show_id.to_string(),
                series_id: item.id.clone(),
                series_name: item.name.clone(),
                local_seasons,
                external_seasons: external.clone(),
            });
        }

        let anomalies = detect_episode_mapping_anomalies(&shows);
        self.store
            .anomalies()
            .replace_episode_mapping_anomalies(&anomalies)
            .await?;

        info!(
            shows_scanned = shows.len(),
            fetched = outcome.fetched,
            failed = outcome.failed,
            anomalies = anomalies.len(),
            "Episode mapping scan finished"
        );

        Ok(ScanSummary {
            shows_scanned: shows.len(),
            fetched: outcome.fetched,
            cached,
            failed: outcome.failed,
            anomalies,
        })
    }

    async fn fetch_missing(
        &self,
        show_ids: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome> {
        if show_ids.is_empty() {
            return Ok(FetchOutcome::default());
        }

        let pool: WorkerPool<String> = WorkerPool::new(self.pool_config.clone(), cancel.clone())?;
        let stop = pool.cancellation_token();
        let guard = Arc::new(AuthGuard::new(self.max_consecutive_auth_failures));
        let processed = Arc::new(AtomicU64::new(0));
        let total = show_ids.len() as u64;

        for show_id in show_ids {
            if stop.is_cancelled() {
                break;
            }

            let source = Arc::clone(&self.source);
            let store = self.store.clone();
            let events = self.events.clone();
            let guard = Arc::clone(&guard);
            let processed = Arc::clone(&processed);
            let stop = stop.clone();

            pool.submit(move || async move {
                if stop.is_cancelled() {
                    return Err(anyhow!("Scan stopped before show {show_id} was fetched"));
                }

                let result = source.fetch_show_seasons(&show_id).await;

                let done = processed.fetch_add(1, Ordering::SeqCst) + 1;
                events
                    .emit(CoreEvent::Analysis(AnalysisEvent::Progress {
                        kind: KIND.to_string(),
                        processed: done,
                        total,
                    }))
                    .ok();

                match result {
                    Ok(seasons) => {
                        guard.record_success();
                        let snapshot: Vec<ExternalSeasonSnapshot> = seasons
                            .iter()
                            .map(|season| ExternalSeasonSnapshot::from_season_info(&show_id, season))
                            .collect();
                        store
                            .metadata_snapshots()
                            .save_show(&show_id, &snapshot)
                            .await?;
                        debug!(show_id = %show_id, seasons = snapshot.len(), "Cached provider seasons");
                        Ok(show_id)
                    }
                    Err(error) => {
                        if error.is_authentication() && guard.record_auth_failure() {
                            warn!(
                                threshold = guard.threshold,
                                "Too many consecutive authentication failures, stopping scan"
                            );
                            stop.cancel();
                        }
                        Err(anyhow::Error::new(error)
                            .context(format!("Season lookup failed for show {show_id}")))
                    }
                }
            })
            .await;
        }

        let results = pool.wait().await;
        let mut outcome = FetchOutcome {
            aborted: guard.aborted.load(Ordering::SeqCst),
            ..Default::default()
        };
        for result in results {
            match result {
                Ok(_) => outcome.fetched += 1,
                Err(error) => {
                    warn!(error = %error, "Skipping show");
                    outcome.failed += 1;
                }
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_guard_trips_once_at_threshold() {
        let guard = AuthGuard::new(3);
        assert!(!guard.record_auth_failure());
        assert!(!guard.record_auth_failure());
        guard.record_success();
        assert!(!guard.record_auth_failure());
        assert!(!guard.record_auth_failure());
        assert!(guard.record_auth_failure());
        assert!(!guard.record_auth_failure());
    }

    #[test]
    fn test_zero_threshold_trips_on_first_failure() {
        let guard = AuthGuard::new(0);
        assert!(guard.record_auth_failure());
    }
}
