//! Cache store
//!
//! Bundles the repositories that make up the local catalog cache so they can
//! be handed around as one cloneable value.

use crate::db::{create_pool, DatabaseConfig};
use crate::error::Result;
use crate::repositories::{
    AnomalyRepository, MediaItemRepository, MetadataSnapshotRepository, SeasonRepository,
    SqliteAnomalyRepository, SqliteMediaItemRepository, SqliteMetadataSnapshotRepository,
    SqliteSeasonRepository, SqliteSyncStateRepository, SyncStateRepository,
};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct CacheStore {
    media_items: Arc<dyn MediaItemRepository>,
    seasons: Arc<dyn SeasonRepository>,
    sync_state: Arc<dyn SyncStateRepository>,
    metadata_snapshots: Arc<dyn MetadataSnapshotRepository>,
    anomalies: Arc<dyn AnomalyRepository>,
}

impl CacheStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            media_items: Arc::new(SqliteMediaItemRepository::new(pool.clone())),
            seasons: Arc::new(SqliteSeasonRepository::new(pool.clone())),
            sync_state: Arc::new(SqliteSyncStateRepository::new(pool.clone())),
            metadata_snapshots: Arc::new(SqliteMetadataSnapshotRepository::new(pool.clone())),
            anomalies: Arc::new(SqliteAnomalyRepository::new(pool)),
        }
    }

    /// Open (or create) the cache database and migrate it.
    pub async fn open(config: DatabaseConfig) -> Result<Self> {
        Ok(Self::new(create_pool(config).await?))
    }

    pub async fn in_memory() -> Result<Self> {
        Self::open(DatabaseConfig::in_memory()).await
    }

    pub fn with_media_items(mut self, repository: Arc<dyn MediaItemRepository>) -> Self {
        self.media_items = repository;
        self
    }

    pub fn with_seasons(mut self, repository: Arc<dyn SeasonRepository>) -> Self {
        self.seasons = repository;
        self
    }

    pub fn with_metadata_snapshots(
        mut self,
        repository: Arc<dyn MetadataSnapshotRepository>,
    ) -> Self {
        self.metadata_snapshots = repository;
        self
    }

    pub fn media_items(&self) -> &dyn MediaItemRepository {
        self.media_items.as_ref()
    }

    /// Owned handle for work that outlives the borrow, such as a spawned task.
    pub fn shared_media_items(&self) -> Arc<dyn MediaItemRepository> {
        Arc::clone(&self.media_items)
    }

    pub fn seasons(&self) -> &dyn SeasonRepository {
        self.seasons.as_ref()
    }

    pub fn sync_state(&self) -> &dyn SyncStateRepository {
        self.sync_state.as_ref()
    }

    pub fn metadata_snapshots(&self) -> &dyn MetadataSnapshotRepository {
        self.metadata_snapshots.as_ref()
    }

    pub fn anomalies(&self) -> &dyn AnomalyRepository {
        self.anomalies.as_ref()
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore").finish_non_exhaustive()
    }
}
