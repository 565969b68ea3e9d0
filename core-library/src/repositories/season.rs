//! Season aggregate repository
//!
//! Seasons are never written directly. [`SeasonRepository::rebuild_from_media`]
//! recomputes the whole table from episodes using their resolved numbers.

use crate::error::Result;
use crate::models::SeasonRecord;
use async_trait::async_trait;
use sqlx::{query, query_as, SqlitePool};

#[async_trait]
pub trait SeasonRepository: Send + Sync {
    /// Replace the season table with counts derived from cached episodes.
    /// Returns the number of seasons written.
    async fn rebuild_from_media(&self) -> Result<u64>;

    async fn count(&self) -> Result<i64>;

    async fn find_by_series(&self, series_id: &str) -> Result<Vec<SeasonRecord>>;

    async fn load_all(&self) -> Result<Vec<SeasonRecord>>;

    async fn clear(&self) -> Result<u64>;
}

pub struct SqliteSeasonRepository {
    pool: SqlitePool,
}

impl SqliteSeasonRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SeasonRepository for SqliteSeasonRepository {
    async fn rebuild_from_media(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        query("DELETE FROM seasons").execute(&mut *tx).await?;

        // Episodes without a series or a resolvable season are left out.
        let result = query(
            r#"
            INSERT INTO seasons (series_id, season_number, series_name, episode_count)
            SELECT series_id, resolved_season, MAX(series_name), COUNT(*)
            FROM media_items
            WHERE kind = 'Episode'
              AND series_id IS NOT NULL
              AND resolved_season IS NOT NULL
            GROUP BY series_id, resolved_season
            "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = query_as("SELECT COUNT(*) FROM seasons")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn find_by_series(&self, series_id: &str) -> Result<Vec<SeasonRecord>> {
        let seasons = query_as::<_, SeasonRecord>(
            "SELECT * FROM seasons WHERE series_id = ? ORDER BY season_number",
        )
        .bind(series_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(seasons)
    }

    async fn load_all(&self) -> Result<Vec<SeasonRecord>> {
        let seasons =
            query_as::<_, SeasonRecord>("SELECT * FROM seasons ORDER BY series_id, season_number")
                .fetch_all(&self.pool)
                .await?;
        Ok(seasons)
    }

    async fn clear(&self) -> Result<u64> {
        let result = query("DELETE FROM seasons").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::MediaItem;
    use crate::repositories::{MediaItemRepository, SqliteMediaItemRepository};
    use bridge_traits::media_source::{ItemKind, RemoteItem};

    fn episode(id: &str, series: &str, path: &str, season: Option<i32>) -> MediaItem {
        MediaItem::from_remote(
            RemoteItem::new(id, id, ItemKind::Episode)
                .with_series(series, format!("Show {series}"))
                .with_indexes(season, Some(1))
                .with_path(path),
            0,
        )
    }

    #[tokio::test]
    async fn test_rebuild_groups_by_resolved_season() {
        let pool = create_test_pool().await.unwrap();
        let media = SqliteMediaItemRepository::new(pool.clone());
        let seasons = SqliteSeasonRepository::new(pool);

        media
            .upsert_batch(&[
                // Server reports season 20 for everything; the paths disagree.
                episode("e1", "s1", "/tv/Show/Season 21/Show.S21E01.mkv", Some(20)),
                episode("e2", "s1", "/tv/Show/Season 21/Show.S21E02.mkv", Some(20)),
                episode("e3", "s1", "/tv/Show/Season 22/Show.S22E01.mkv", Some(20)),
                episode("e4", "s2", "/tv/Other/x.mkv", Some(1)),
                episode("e5", "s2", "/tv/Other/y.mkv", None),
            ])
            .await
            .unwrap();

        assert_eq!(seasons.rebuild_from_media().await.unwrap(), 3);

        let s1 = seasons.find_by_series("s1").await.unwrap();
        let counts: Vec<_> = s1.iter().map(|s| (s.season_number, s.episode_count)).collect();
        assert_eq!(counts, vec![(21, 2), (22, 1)]);
        assert_eq!(s1[0].series_name.as_deref(), Some("Show s1"));

        let s2 = seasons.find_by_series("s2").await.unwrap();
        assert_eq!(s2.len(), 1);
        assert_eq!(s2[0].episode_count, 1);
    }

    #[tokio::test]
    async fn test_rebuild_replaces_previous_contents() {
        let pool = create_test_pool().await.unwrap();
        let media = SqliteMediaItemRepository::new(pool.clone());
        let seasons = SqliteSeasonRepository::new(pool);

        media
            .upsert_batch(&[episode("e1", "s1", "/tv/S/Season 1/a.mkv", None)])
            .await
            .unwrap();
        seasons.rebuild_from_media().await.unwrap();
        assert_eq!(seasons.count().await.unwrap(), 1);

        media.clear().await.unwrap();
        assert_eq!(seasons.rebuild_from_media().await.unwrap(), 0);
        assert!(seasons.load_all().await.unwrap().is_empty());
    }
}
