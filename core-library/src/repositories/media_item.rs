//! Media item repository

use crate::error::{LibraryError, Result};
use crate::models::{KindCounts, MediaItem, MediaItemRow};
use crate::repositories::{Page, PageRequest};
use async_trait::async_trait;
use bridge_traits::media_source::ItemKind;
use serde::{Deserialize, Serialize};
use sqlx::{query, query_as, QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;

/// Secondary indexes on `media_items`, dropped and recreated around bulk loads.
pub const SECONDARY_INDEXES: &[(&str, &str)] = &[
    (
        "idx_media_items_kind",
        "CREATE INDEX IF NOT EXISTS idx_media_items_kind ON media_items(kind)",
    ),
    (
        "idx_media_items_series",
        "CREATE INDEX IF NOT EXISTS idx_media_items_series ON media_items(series_id, resolved_season)",
    ),
    (
        "idx_media_items_tmdb",
        "CREATE INDEX IF NOT EXISTS idx_media_items_tmdb ON media_items(tmdb_id)",
    ),
];

/// Largest id list bound into a single statement.
const MAX_BOUND_IDS: usize = 500;

/// Rows written by one upsert batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertOutcome {
    pub inserted: u64,
    pub updated: u64,
}

impl UpsertOutcome {
    pub fn total(&self) -> u64 {
        self.inserted + self.updated
    }
}

impl std::ops::AddAssign for UpsertOutcome {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.updated += other.updated;
    }
}

#[async_trait]
pub trait MediaItemRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<MediaItem>>;

    /// Insert or replace every item in one transaction.
    ///
    /// Either all rows are written or none are.
    async fn upsert_batch(&self, items: &[MediaItem]) -> Result<UpsertOutcome>;

    /// Delete the given ids in one transaction. Returns the number of rows removed.
    async fn delete_by_ids(&self, ids: &[String]) -> Result<u64>;

    /// Remove every media item.
    async fn clear(&self) -> Result<u64>;

    async fn count(&self) -> Result<i64>;

    async fn count_by_kind(&self) -> Result<KindCounts>;

    async fn all_ids(&self) -> Result<Vec<String>>;

    /// Every cached item, ordered by name then id.
    async fn load_all(&self) -> Result<Vec<MediaItem>>;

    async fn load_by_kind(&self, kind: ItemKind) -> Result<Vec<MediaItem>>;

    async fn query_by_kind(&self, kind: ItemKind, page: PageRequest) -> Result<Page<MediaItem>>;

    /// Series carrying a TMDB id, the input of the episode mapping scan.
    async fn find_series_with_tmdb_id(&self) -> Result<Vec<MediaItem>>;

    async fn drop_secondary_indexes(&self) -> Result<()>;

    async fn create_secondary_indexes(&self) -> Result<()>;
}

pub struct SqliteMediaItemRepository {
    pool: SqlitePool,
}

impl SqliteMediaItemRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn convert(rows: Vec<MediaItemRow>) -> Result<Vec<MediaItem>> {
        rows.into_iter().map(MediaItem::try_from).collect()
    }
}

#[async_trait]
impl MediaItemRepository for SqliteMediaItemRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<MediaItem>> {
        let row = query_as::<_, MediaItemRow>("SELECT * FROM media_items WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(MediaItem::try_from).transpose()
    }

    async fn upsert_batch(&self, items: &[MediaItem]) -> Result<UpsertOutcome> {
        let mut outcome = UpsertOutcome::default();
        if items.is_empty() {
            return Ok(outcome);
        }

        let mut tx = self.pool.begin().await?;

        for item in items {
            item.validate().map_err(|message| LibraryError::InvalidInput {
                field: "media_item".to_string(),
                message,
            })?;

            let exists = query("SELECT 1 FROM media_items WHERE id = ?")
                .bind(&item.id)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();

            let provider_ids = serde_json::to_string(&item.provider_ids)?;

            query(
                r#"
                INSERT INTO media_items (
                    id, name, kind, has_primary_image, provider_ids, tmdb_id, imdb_id,
                    size, index_number, parent_index_number, series_id, series_name,
                    path, resolved_season, resolved_episode, cached_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    kind = excluded.kind,
                    has_primary_image = excluded.has_primary_image,
                    provider_ids = excluded.provider_ids,
                    tmdb_id = excluded.tmdb_id,
                    imdb_id = excluded.imdb_id,
                    size = excluded.size,
                    index_number = excluded.index_number,
                    parent_index_number = excluded.parent_index_number,
                    series_id = excluded.series_id,
                    series_name = excluded.series_name,
                    path = excluded.path,
                    resolved_season = excluded.resolved_season,
                    resolved_episode = excluded.resolved_episode,
                    cached_at = excluded.cached_at
                "#,
            )
            .bind(&item.id)
            .bind(&item.name)
            .bind(item.kind.as_str())
            .bind(item.has_primary_image)
            .bind(provider_ids)
            .bind(item.tmdb_id())
            .bind(item.imdb_id())
            .bind(item.size)
            .bind(item.index_number)
            .bind(item.parent_index_number)
            .bind(&item.series_id)
            .bind(&item.series_name)
            .bind(&item.path)
            .bind(item.resolved_season)
            .bind(item.resolved_episode)
            .bind(item.cached_at)
            .execute(&mut *tx)
            .await?;

            if exists {
                outcome.updated += 1;
            } else {
                outcome.inserted += 1;
            }
        }

        tx.commit().await?;

        debug!(
            inserted = outcome.inserted,
            updated = outcome.updated,
            "Upserted media item batch"
        );
        Ok(outcome)
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut deleted = 0;

        for chunk in ids.chunks(MAX_BOUND_IDS) {
            let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM media_items WHERE id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(id);
            }
            separated.push_unseparated(")");

            deleted += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(deleted)
    }

    async fn clear(&self) -> Result<u64> {
        let result = query("DELETE FROM media_items").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = query_as("SELECT COUNT(*) FROM media_items")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_by_kind(&self) -> Result<KindCounts> {
        let rows: Vec<(String, i64)> =
            query_as("SELECT kind, COUNT(*) FROM media_items GROUP BY kind")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = KindCounts::default();
        for (kind, count) in rows {
            match kind.parse::<ItemKind>()? {
                ItemKind::Movie => counts.movies = count,
                ItemKind::Series => counts.series = count,
                ItemKind::Episode => counts.episodes = count,
            }
        }
        Ok(counts)
    }

    async fn all_ids(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = query_as("SELECT id FROM media_items")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn load_all(&self) -> Result<Vec<MediaItem>> {
        let rows = query_as::<_, MediaItemRow>("SELECT * FROM media_items ORDER BY name, id")
            .fetch_all(&self.pool)
            .await?;
        Self::convert(rows)
    }

    async fn load_by_kind(&self, kind: ItemKind) -> Result<Vec<MediaItem>> {
        let rows = query_as::<_, MediaItemRow>(
            "SELECT * FROM media_items WHERE kind = ? ORDER BY name, id",
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;
        Self::convert(rows)
    }

    async fn query_by_kind(&self, kind: ItemKind, page: PageRequest) -> Result<Page<MediaItem>> {
        let (total,): (i64,) = query_as("SELECT COUNT(*) FROM media_items WHERE kind = ?")
            .bind(kind.as_str())
            .fetch_one(&self.pool)
            .await?;

        let rows = query_as::<_, MediaItemRow>(
            "SELECT * FROM media_items WHERE kind = ? ORDER BY name, id LIMIT ? OFFSET ?",
        )
        .bind(kind.as_str())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(Page::new(Self::convert(rows)?, total as u64, page))
    }

    async fn find_series_with_tmdb_id(&self) -> Result<Vec<MediaItem>> {
        let rows = query_as::<_, MediaItemRow>(
            r#"
            SELECT * FROM media_items
            WHERE kind = 'Series' AND tmdb_id IS NOT NULL AND tmdb_id != ''
            ORDER BY name, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Self::convert(rows)
    }

    async fn drop_secondary_indexes(&self) -> Result<()> {
        for (name, _) in SECONDARY_INDEXES {
            query(&format!("DROP INDEX IF EXISTS {name}"))
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn create_secondary_indexes(&self) -> Result<()> {
        for (_, ddl) in SECONDARY_INDEXES {
            query(ddl).execute(&self.pool).await?;
        }
        Ok(())
    }
}
