//! Core service façade and bootstrap helpers.
//!
//! This crate wires configuration and host-provided bridges into the catalog
//! core: the media server connector, the optional metadata provider, the
//! SQLite cache, the sync coordinator and the analysis service. Servers and
//! desktop hosts enable the default `desktop-shims` feature, which supplies a
//! `reqwest` HTTP client when the configuration does not carry one.
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use core_service::CoreService;
//!
//! let config = CoreConfig::from_file("catalog.toml")?;
//! let core = CoreService::bootstrap(config).await?;
//!
//! let mut events = core.subscribe();
//! let summary = core.incremental_sync().await?;
//! let duplicates = core.analyze_duplicates().await?;
//! ```

pub mod error;

pub use error::{CoreError, Result};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bridge_traits::error::BridgeError;
use bridge_traits::http::HttpClient;
use bridge_traits::media_source::{ItemKind, RemoteMediaSource};
use bridge_traits::metadata_source::ExternalMetadataSource;
use bridge_traits::time::{Clock, SystemClock};
use core_async::{CancellationToken, WorkerPoolConfig};
use core_library::db::DatabaseConfig;
use core_library::repositories::{Page, PageRequest};
use core_library::{
    CacheStore, DuplicateGroupMember, EpisodeMappingAnomaly, KindCounts, MediaItem,
    ScrapeAnomaly, SeasonRecord,
};
use core_reconcile::{AnalysisService, EpisodeMappingScanner, ScanSummary};
use core_runtime::config::{CoreConfig, WorkerPoolSettings};
use core_runtime::events::{CoreEvent, EventBus};
use core_sync::{
    PipelineConfig, PurgeSummary, SyncCoordinator, SyncError, SyncJobId, SyncMode, SyncPipeline,
    SyncSummary,
};
use provider_emby::EmbyConnector;
use provider_tmdb::TmdbClient;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

/// Events buffered per subscriber before the slowest one starts lagging.
const EVENT_BUS_CAPACITY: usize = 256;

/// Aggregated handle to the collaborators the core requires.
pub struct CoreDependencies {
    pub remote: Arc<dyn RemoteMediaSource>,
    /// `None` disables episode mapping scans
    pub metadata: Option<Arc<dyn ExternalMetadataSource>>,
    pub store: CacheStore,
    pub clock: Arc<dyn Clock>,
}

impl CoreDependencies {
    pub fn new(remote: Arc<dyn RemoteMediaSource>, store: CacheStore) -> Self {
        Self {
            remote,
            metadata: None,
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_metadata(mut self, metadata: Arc<dyn ExternalMetadataSource>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

fn pool_config(settings: &WorkerPoolSettings) -> WorkerPoolConfig {
    WorkerPoolConfig::new(settings.min_workers, settings.max_workers)
        .with_idle_timeout(settings.idle_timeout())
        .with_queue_capacity(settings.queue_capacity)
}

/// Episode mapping scan in flight, if any.
#[derive(Default)]
struct ScanSlot {
    token: Option<CancellationToken>,
    generation: u64,
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    remote: Arc<dyn RemoteMediaSource>,
    store: CacheStore,
    events: EventBus,
    coordinator: SyncCoordinator,
    analysis: AnalysisService,
    scan: Arc<Mutex<ScanSlot>>,
}

impl CoreService {
    /// Build the service from explicit collaborators.
    pub fn new(deps: CoreDependencies, config: &CoreConfig) -> Self {
        let events = EventBus::new(EVENT_BUS_CAPACITY);

        let pipeline = SyncPipeline::new(
            Arc::clone(&deps.remote),
            deps.store.clone(),
            events.clone(),
            deps.clock,
            PipelineConfig::from_settings(&config.sync, config.media_server.page_size),
        );
        let coordinator = SyncCoordinator::new(pipeline, events.clone(), config.sync.timeout());

        let mut analysis = AnalysisService::new(deps.store.clone(), events.clone());
        if let Some(metadata) = deps.metadata {
            analysis = analysis.with_scanner(EpisodeMappingScanner::new(
                deps.store.clone(),
                metadata,
                events.clone(),
                pool_config(&config.worker_pool),
                config.analysis.max_consecutive_auth_failures,
            ));
        }

        Self {
            remote: deps.remote,
            store: deps.store,
            events,
            coordinator,
            analysis,
            scan: Arc::new(Mutex::new(ScanSlot::default())),
        }
    }

    /// Open the cache and connect the configured providers.
    ///
    /// # Errors
    ///
    /// Fails when the database cannot be opened or migrated, or when no HTTP
    /// client is available.
    #[instrument(skip(config), fields(database = %config.database_path.display()))]
    pub async fn bootstrap(config: CoreConfig) -> Result<Self> {
        let http_client = resolve_http_client(&config)?;
        let store = CacheStore::open(DatabaseConfig::new(&config.database_path)).await?;

        let remote: Arc<dyn RemoteMediaSource> = Arc::new(EmbyConnector::from_config(
            Arc::clone(&http_client),
            &config.media_server,
        ));
        let mut deps = CoreDependencies::new(remote, store);

        if config.metadata.has_tmdb() {
            let tmdb = TmdbClient::from_config(http_client, &config.metadata)
                .map_err(|e| CoreError::InitializationFailed(e.to_string()))?;
            deps = deps.with_metadata(Arc::new(tmdb));
        } else {
            info!("No TMDB API key configured, episode mapping scans are disabled");
        }

        info!(server = %config.media_server.base_url, "Catalog core initialized");
        Ok(Self::new(deps, &config))
    }

    /// Subscribe to sync and analysis events.
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    // ----- Sync -----

    pub async fn full_sync(&self) -> Result<SyncSummary> {
        Ok(self.coordinator.full_sync().await?)
    }

    pub async fn incremental_sync(&self) -> Result<SyncSummary> {
        Ok(self.coordinator.incremental_sync().await?)
    }

    pub async fn purge_deleted(&self) -> Result<PurgeSummary> {
        Ok(self.coordinator.purge_deleted().await?)
    }

    /// Incremental sync followed by deleted-item detection.
    ///
    /// The purge is skipped when the sync fails.
    #[instrument(skip(self))]
    pub async fn incremental_sync_and_purge(&self) -> Result<(SyncSummary, PurgeSummary)> {
        let sync = self.coordinator.incremental_sync().await?;
        let purge = self.coordinator.purge_deleted().await?;
        Ok((sync, purge))
    }

    /// Start a sync job in the background; follow it through [`subscribe`](Self::subscribe).
    pub fn start_sync(&self, mode: SyncMode) -> Result<SyncJobId> {
        Ok(self.coordinator.start(mode)?)
    }

    /// Cancel the running sync job. Returns false when nothing was running.
    pub fn cancel_sync(&self) -> bool {
        self.coordinator.cancel()
    }

    pub fn is_syncing(&self) -> bool {
        self.coordinator.is_running()
    }

    pub fn active_sync(&self) -> Option<(SyncJobId, SyncMode)> {
        self.coordinator.active_job()
    }

    // ----- Deletion -----

    /// Delete an item on the server, then drop it from the cache.
    ///
    /// An item the server no longer knows is still removed locally.
    #[instrument(skip(self))]
    pub async fn delete_item(&self, id: &str) -> Result<()> {
        self.ensure_idle()?;

        match self.remote.delete_item(id).await {
            Ok(()) => {}
            Err(BridgeError::NotFound(_)) => {
                warn!(item_id = %id, "Item already gone on server, removing cached copy");
            }
            Err(e) => return Err(e.into()),
        }

        let removed = self
            .store
            .media_items()
            .delete_by_ids(&[id.to_string()])
            .await?;
        if removed > 0 {
            self.store.seasons().rebuild_from_media().await?;
        }
        info!(item_id = %id, removed, "Deleted item");
        Ok(())
    }

    /// Delete one media version of a multi-version item on the server.
    ///
    /// The cached item stays; the next sync refreshes its size and path.
    #[instrument(skip(self))]
    pub async fn delete_version(&self, id: &str) -> Result<()> {
        self.remote.delete_version(id).await?;
        info!(version_id = %id, "Deleted media version");
        Ok(())
    }

    fn ensure_idle(&self) -> Result<()> {
        match self.coordinator.active_job() {
            Some((job_id, _)) => Err(SyncError::SyncInProgress {
                job_id: job_id.to_string(),
            }
            .into()),
            None => Ok(()),
        }
    }

    // ----- Analysis -----

    pub async fn analyze_duplicates(&self) -> Result<Vec<DuplicateGroupMember>> {
        Ok(self.analysis.analyze_duplicates().await?)
    }

    pub async fn analyze_scrape(&self) -> Result<Vec<ScrapeAnomaly>> {
        Ok(self.analysis.analyze_scrape().await?)
    }

    /// Run an episode mapping scan; [`cancel_scan`](Self::cancel_scan) stops it.
    ///
    /// Starting a scan while another runs cancels the older one.
    pub async fn scan_episode_mapping(&self) -> Result<ScanSummary> {
        let cancel = CancellationToken::new();
        let generation = {
            let mut slot = self.scan_slot();
            if let Some(previous) = slot.token.replace(cancel.clone()) {
                previous.cancel();
            }
            slot.generation += 1;
            slot.generation
        };

        let result = self.analysis.scan_episode_mapping(&cancel).await;

        let mut slot = self.scan_slot();
        if slot.generation == generation {
            slot.token = None;
        }
        drop(slot);

        Ok(result?)
    }

    /// Cancel the running episode mapping scan. Returns false when none was running.
    pub fn cancel_scan(&self) -> bool {
        match self.scan_slot().token.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn scan_slot(&self) -> MutexGuard<'_, ScanSlot> {
        self.scan.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget cached provider seasons so the next scan fetches every show.
    pub async fn clear_metadata_cache(&self) -> Result<()> {
        self.store.metadata_snapshots().clear().await?;
        Ok(())
    }

    // ----- Reads -----

    pub async fn kind_counts(&self) -> Result<KindCounts> {
        Ok(self.store.media_items().count_by_kind().await?)
    }

    pub async fn get_item(&self, id: &str) -> Result<Option<MediaItem>> {
        Ok(self.store.media_items().find_by_id(id).await?)
    }

    pub async fn items_by_kind(&self, kind: ItemKind, page: PageRequest) -> Result<Page<MediaItem>> {
        Ok(self.store.media_items().query_by_kind(kind, page).await?)
    }

    pub async fn seasons(&self) -> Result<Vec<SeasonRecord>> {
        Ok(self.store.seasons().load_all().await?)
    }

    pub async fn duplicates(&self) -> Result<Vec<DuplicateGroupMember>> {
        Ok(self.store.anomalies().list_duplicates().await?)
    }

    pub async fn scrape_anomalies(&self) -> Result<Vec<ScrapeAnomaly>> {
        Ok(self.store.anomalies().list_scrape_anomalies().await?)
    }

    pub async fn episode_mapping_anomalies(&self) -> Result<Vec<EpisodeMappingAnomaly>> {
        Ok(self.store.anomalies().list_episode_mapping_anomalies().await?)
    }
}

#[cfg(all(feature = "desktop-shims", not(target_arch = "wasm32")))]
fn resolve_http_client(config: &CoreConfig) -> Result<Arc<dyn HttpClient>> {
    use std::time::Duration;

    match &config.http_client {
        Some(client) => Ok(Arc::clone(client)),
        None => {
            let timeout = Duration::from_secs(config.media_server.request_timeout_secs);
            let client = bridge_desktop::ReqwestHttpClient::with_timeout(timeout)
                .map_err(|e| CoreError::InitializationFailed(e.to_string()))?;
            Ok(Arc::new(client))
        }
    }
}

#[cfg(not(all(feature = "desktop-shims", not(target_arch = "wasm32"))))]
fn resolve_http_client(config: &CoreConfig) -> Result<Arc<dyn HttpClient>> {
    config
        .http_client
        .clone()
        .ok_or_else(|| CoreError::CapabilityMissing {
            capability: "HttpClient".to_string(),
            message: "No HTTP client configured and desktop-shims is disabled".to_string(),
        })
}
