//! Cached season summaries from the external metadata provider
//!
//! A show with a row in `external_shows` has been fetched, even when the
//! provider returned no seasons. That lets the mapping scan skip shows whose
//! lookup already came back empty.

use crate::error::Result;
use crate::models::ExternalSeasonSnapshot;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{query, query_as, SqlitePool};

#[async_trait]
pub trait MetadataSnapshotRepository: Send + Sync {
    /// `None` when the show was never fetched.
    async fn find_show(&self, show_id: &str) -> Result<Option<Vec<ExternalSeasonSnapshot>>>;

    /// Replace the cached seasons of one show.
    async fn save_show(&self, show_id: &str, seasons: &[ExternalSeasonSnapshot]) -> Result<()>;

    async fn cached_show_ids(&self) -> Result<Vec<String>>;

    async fn clear(&self) -> Result<()>;
}

pub struct SqliteMetadataSnapshotRepository {
    pool: SqlitePool,
}

impl SqliteMetadataSnapshotRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetadataSnapshotRepository for SqliteMetadataSnapshotRepository {
    async fn find_show(&self, show_id: &str) -> Result<Option<Vec<ExternalSeasonSnapshot>>> {
        let fetched: Option<(String,)> =
            query_as("SELECT show_id FROM external_shows WHERE show_id = ?")
                .bind(show_id)
                .fetch_optional(&self.pool)
                .await?;

        if fetched.is_none() {
            return Ok(None);
        }

        let seasons = query_as::<_, ExternalSeasonSnapshot>(
            r#"
            SELECT show_id, season_number, episode_count, season_name
            FROM external_season_snapshots
            WHERE show_id = ?
            ORDER BY season_number
            "#,
        )
        .bind(show_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(seasons))
    }

    async fn save_show(&self, show_id: &str, seasons: &[ExternalSeasonSnapshot]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        query(
            r#"
            INSERT INTO external_shows (show_id, fetched_at) VALUES (?, ?)
            ON CONFLICT(show_id) DO UPDATE SET fetched_at = excluded.fetched_at
            "#,
        )
        .bind(show_id)
        .bind(Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;

        query("DELETE FROM external_season_snapshots WHERE show_id = ?")
            .bind(show_id)
            .execute(&mut *tx)
            .await?;

        for season in seasons {
            query(
                r#"
                INSERT OR REPLACE INTO external_season_snapshots
                    (show_id, season_number, episode_count, season_name)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(show_id)
            .bind(season.season_number)
            .bind(season.episode_count)
            .bind(&season.season_name)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn cached_show_ids(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = query_as("SELECT show_id FROM external_shows ORDER BY show_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn clear(&self) -> Result<()> {
        // Snapshots cascade.
        query("DELETE FROM external_shows").execute(&self.pool).await?;
        Ok(())
    }
}
