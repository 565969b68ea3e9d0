//! Shared fixtures for the sync integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::media_source::{ItemKind, ItemPage, RemoteItem, RemoteMediaSource};
use bridge_traits::time::ManualClock;
use chrono::{DateTime, TimeZone, Utc};
use core_async::CancellationToken;
use core_library::CacheStore;
use core_runtime::events::EventBus;
use core_sync::{PipelineConfig, SyncPipeline};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory media server.
#[derive(Default)]
pub struct FakeMediaServer {
    catalog: Mutex<Vec<RemoteItem>>,
    changed: Mutex<Vec<RemoteItem>>,
    ids: Mutex<Option<Vec<String>>>,
    fail_on_page: Mutex<Option<u64>>,
    cancel_on_page: Mutex<Option<(u64, CancellationToken)>>,
    page_delay: Mutex<Option<Duration>>,
    max_page_size: Mutex<Option<u32>>,
    untracked: Mutex<HashSet<usize>>,
    pages_served: AtomicU64,
    since_requests: Mutex<Vec<DateTime<Utc>>>,
}

impl FakeMediaServer {
    pub fn new(catalog: Vec<RemoteItem>) -> Arc<Self> {
        let server = Self::default();
        *server.catalog.lock().unwrap() = catalog;
        Arc::new(server)
    }

    pub fn set_catalog(&self, catalog: Vec<RemoteItem>) {
        *self.catalog.lock().unwrap() = catalog;
    }

    pub fn set_changed(&self, changed: Vec<RemoteItem>) {
        *self.changed.lock().unwrap() = changed;
    }

    /// Override what `list_all_ids` reports.
    pub fn set_ids(&self, ids: Vec<String>) {
        *self.ids.lock().unwrap() = Some(ids);
    }

    /// Fail the n-th page request (1-based).
    pub fn fail_on_page(&self, page: u64) {
        *self.fail_on_page.lock().unwrap() = Some(page);
    }

    /// Cancel `token` while serving the n-th page (1-based).
    pub fn cancel_on_page(&self, page: u64, token: CancellationToken) {
        *self.cancel_on_page.lock().unwrap() = Some((page, token));
    }

    pub fn delay_pages(&self, delay: Duration) {
        *self.page_delay.lock().unwrap() = Some(delay);
    }

    /// Serve at most `limit` records per page whatever the caller asks for.
    pub fn cap_page_size(&self, limit: u32) {
        *self.max_page_size.lock().unwrap() = Some(limit);
    }

    /// Count the records at these catalog positions in totals and pages but
    /// leave them out of the returned items, like a connector skipping
    /// untracked types.
    pub fn mark_untracked(&self, positions: &[usize]) {
        self.untracked.lock().unwrap().extend(positions.iter().copied());
    }

    pub fn pages_served(&self) -> u64 {
        self.pages_served.load(Ordering::SeqCst)
    }

    pub fn since_requests(&self) -> Vec<DateTime<Utc>> {
        self.since_requests.lock().unwrap().clone()
    }

    async fn serve(
        &self,
        source: &[RemoteItem],
        kinds: &[ItemKind],
        start_index: u64,
        limit: u32,
    ) -> Result<ItemPage> {
        let delay = *self.page_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let page_number = self.pages_served.fetch_add(1, Ordering::SeqCst) + 1;
        if *self.fail_on_page.lock().unwrap() == Some(page_number) {
            return Err(BridgeError::OperationFailed("502 Bad Gateway".into()));
        }
        if let Some((page, token)) = self.cancel_on_page.lock().unwrap().as_ref() {
            if *page == page_number {
                token.cancel();
            }
        }

        let matching: Vec<RemoteItem> = source
            .iter()
            .filter(|item| kinds.contains(&item.kind))
            .cloned()
            .collect();
        let limit = match *self.max_page_size.lock().unwrap() {
            Some(max) => limit.min(max),
            None => limit,
        };
        let untracked = self.untracked.lock().unwrap().clone();
        let window: Vec<(usize, RemoteItem)> = matching
            .iter()
            .cloned()
            .enumerate()
            .skip(start_index as usize)
            .take(limit as usize)
            .collect();
        let consumed = window.len() as u64;
        let items = window
            .into_iter()
            .filter(|(position, _)| !untracked.contains(position))
            .map(|(_, item)| item)
            .collect();

        Ok(ItemPage::new(items, matching.len() as u64).with_consumed(consumed))
    }
}

#[async_trait]
impl RemoteMediaSource for FakeMediaServer {
    async fn page_items(&self, kinds: &[ItemKind], start_index: u64, limit: u32) -> Result<ItemPage> {
        let catalog = self.catalog.lock().unwrap().clone();
        self.serve(&catalog, kinds, start_index, limit).await
    }

    async fn changed_since(
        &self,
        since: DateTime<Utc>,
        kinds: &[ItemKind],
        start_index: u64,
        limit: u32,
    ) -> Result<ItemPage> {
        self.since_requests.lock().unwrap().push(since);
        let changed = self.changed.lock().unwrap().clone();
        self.serve(&changed, kinds, start_index, limit).await
    }

    async fn list_all_ids(&self, kinds: &[ItemKind]) -> Result<Vec<String>> {
        if let Some(ids) = self.ids.lock().unwrap().clone() {
            return Ok(ids);
        }
        Ok(self
            .catalog
            .lock()
            .unwrap()
            .iter()
            .filter(|item| kinds.contains(&item.kind))
            .map(|item| item.id.clone())
            .collect())
    }

    async fn delete_item(&self, id: &str) -> Result<()> {
        self.catalog.lock().unwrap().retain(|item| item.id != id);
        Ok(())
    }

    async fn delete_version(&self, _id: &str) -> Result<()> {
        Ok(())
    }
}

pub fn movie(n: usize) -> RemoteItem {
    RemoteItem::new(format!("movie-{n}"), format!("Movie {n}"), ItemKind::Movie)
        .with_provider_id("Tmdb", (1000 + n).to_string())
}

pub fn episode(series: usize, season: i32, episode: i32) -> RemoteItem {
    RemoteItem::new(
        format!("ep-{series}-{season}-{episode}"),
        format!("Episode {episode}"),
        ItemKind::Episode,
    )
    .with_series(format!("series-{series}"), format!("Show {series}"))
    .with_indexes(Some(season), Some(episode))
    .with_path(format!(
        "/tv/Show {series}/Season {season}/Show.S{season:02}E{episode:02}.mkv"
    ))
}

pub fn series(n: usize) -> RemoteItem {
    RemoteItem::new(format!("series-{n}"), format!("Show {n}"), ItemKind::Series)
        .with_provider_id("Tmdb", (5000 + n).to_string())
}

/// `movies` movies plus one show with `seasons` seasons of `per_season` episodes.
pub fn catalog(movies: usize, seasons: i32, per_season: i32) -> Vec<RemoteItem> {
    let mut items: Vec<RemoteItem> = (0..movies).map(movie).collect();
    if seasons > 0 {
        items.push(series(1));
        for season in 1..=seasons {
            for ep in 1..=per_season {
                items.push(episode(1, season, ep));
            }
        }
    }
    items
}

pub fn start_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn small_batches() -> PipelineConfig {
    PipelineConfig {
        page_size: 100,
        batch_size: 50,
        queue_capacity: 2,
        purge_batch_size: 10,
        drop_indexes_during_full_sync: true,
    }
}

pub struct Harness {
    pub server: Arc<FakeMediaServer>,
    pub store: CacheStore,
    pub events: EventBus,
    pub clock: Arc<ManualClock>,
    pub pipeline: SyncPipeline,
}

impl Harness {
    pub async fn new(server: Arc<FakeMediaServer>, config: PipelineConfig) -> Self {
        let store = CacheStore::in_memory().await.unwrap();
        Self::with_store(server, store, config)
    }

    pub fn with_store(server: Arc<FakeMediaServer>, store: CacheStore, config: PipelineConfig) -> Self {
        let events = EventBus::new(1024);
        let clock = Arc::new(ManualClock::new(start_instant()));
        let pipeline = SyncPipeline::new(
            server.clone(),
            store.clone(),
            events.clone(),
            clock.clone(),
            config,
        );
        Self {
            server,
            store,
            events,
            clock,
            pipeline,
        }
    }
}
