//! Analysis entry points.
//!
//! Each run loads the cache snapshot, runs one detector, replaces the matching
//! anomaly table and reports `Started` then exactly one of `Completed` or
//! `Failed` on the event bus.

use crate::duplicates::detect_duplicates;
use crate::error::{ReconcileError, Result};
use crate::scanner::{self, EpisodeMappingScanner, ScanSummary};
use crate::scrape::detect_scrape_anomalies;
use bridge_traits::media_source::ItemKind;
use core_async::CancellationToken;
use core_library::{CacheStore, DuplicateGroupMember, ScrapeAnomaly};
use core_runtime::events::{AnalysisEvent, CoreEvent, EventBus};
use std::future::Future;
use std::time::Instant;
use tracing::{error, info, instrument};

#[derive(Clone)]
pub struct AnalysisService {
    store: CacheStore,
    events: EventBus,
    scanner: Option<EpisodeMappingScanner>,
}

impl AnalysisService {
    pub fn new(store: CacheStore, events: EventBus) -> Self {
        Self {
            store,
            events,
            scanner: None,
        }
    }

    /// Enable episode mapping scans.
    pub fn with_scanner(mut self, scanner: EpisodeMappingScanner) -> Self {
        self.scanner = Some(scanner);
        self
    }

    #[instrument(skip(self))]
    pub async fn analyze_duplicates(&self) -> Result<Vec<DuplicateGroupMember>> {
        self.tracked("duplicates", async {
            let mut items = self.store.media_items().load_by_kind(ItemKind::Movie).await?;
            items.extend(self.store.media_items().load_by_kind(ItemKind::Episode).await?);

            let members = detect_duplicates(&items);
            self.store.anomalies().replace_duplicates(&members).await?;
            Ok(members)
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn analyze_scrape(&self) -> Result<Vec<ScrapeAnomaly>> {
        self.tracked("scrape", async {
            let mut items = self.store.media_items().load_by_kind(ItemKind::Movie).await?;
            items.extend(self.store.media_items().load_by_kind(ItemKind::Series).await?);

            let anomalies = detect_scrape_anomalies(&items);
            self.store
                .anomalies()
                .replace_scrape_anomalies(&anomalies)
                .await?;
            Ok(anomalies)
        })
        .await
    }

    #[instrument(skip(self, cancel))]
    pub async fn scan_episode_mapping(&self, cancel: &CancellationToken) -> Result<ScanSummary> {
        let scanner = self.scanner.as_ref().ok_or_else(|| {
            ReconcileError::NotConfigured("no metadata provider is configured".to_string())
        })?;

        self.tracked(scanner::KIND, scanner.scan(cancel)).await
    }

    async fn tracked<T, Fut>(&self, kind: &str, run: Fut) -> Result<T>
    where
        T: AnomalyCount,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        self.emit(AnalysisEvent::Started {
            kind: kind.to_string(),
        });

        let result = run.await;

        match &result {
            Ok(outcome) => {
                info!(kind, anomalies = outcome.anomaly_count(), "Analysis completed");
                self.emit(AnalysisEvent::Completed {
                    kind: kind.to_string(),
                    anomalies: outcome.anomaly_count(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }
            Err(e) => {
                error!(kind, error = %e, "Analysis failed");
                self.emit(AnalysisEvent::Failed {
                    kind: kind.to_string(),
                    message: e.to_string(),
                });
            }
        }

        result
    }

    fn emit(&self, event: AnalysisEvent) {
        self.events.emit(CoreEvent::Analysis(event)).ok();
    }
}

/// Number of anomaly rows an analysis produced.
trait AnomalyCount {
    fn anomaly_count(&self) -> u64;
}

impl<T> AnomalyCount for Vec<T> {
    fn anomaly_count(&self) -> u64 {
        self.len() as u64
    }
}

impl AnomalyCount for ScanSummary {
    fn anomaly_count(&self) -> u64 {
        self.anomalies.len() as u64
    }
}
