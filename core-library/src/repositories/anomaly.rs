//! Persisted analysis results
//!
//! Each anomaly set is replaced wholesale by the analysis that produces it, so
//! readers only ever see the output of one complete run. Rows come back in the
//! order they were written.

use crate::error::Result;
use crate::models::{
    DuplicateGroupMember, DuplicateRow, EpisodeMappingAnomaly, ScrapeAnomaly, ScrapeAnomalyRow,
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{query, query_as, SqlitePool};

#[async_trait]
pub trait AnomalyRepository: Send + Sync {
    async fn replace_duplicates(&self, members: &[DuplicateGroupMember]) -> Result<()>;

    async fn list_duplicates(&self) -> Result<Vec<DuplicateGroupMember>>;

    async fn replace_scrape_anomalies(&self, anomalies: &[ScrapeAnomaly]) -> Result<()>;

    async fn list_scrape_anomalies(&self) -> Result<Vec<ScrapeAnomaly>>;

    async fn replace_episode_mapping_anomalies(
        &self,
        anomalies: &[EpisodeMappingAnomaly],
    ) -> Result<()>;

    async fn list_episode_mapping_anomalies(&self) -> Result<Vec<EpisodeMappingAnomaly>>;
}

pub struct SqliteAnomalyRepository {
    pool: SqlitePool,
}

impl SqliteAnomalyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AnomalyRepository for SqliteAnomalyRepository {
    async fn replace_duplicates(&self, members: &[DuplicateGroupMember]) -> Result<()> {
        let detected_at = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        query("DELETE FROM duplicate_items").execute(&mut *tx).await?;

        for member in members {
            query(
                r#"
                INSERT OR REPLACE INTO duplicate_items (
                    group_key, group_name, item_id, item_name, kind, size, path,
                    series_name, season_number, episode_number, detected_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&member.group_key)
            .bind(&member.group_name)
            .bind(&member.item_id)
            .bind(&member.item_name)
            .bind(member.kind.as_str())
            .bind(member.size)
            .bind(&member.path)
            .bind(&member.series_name)
            .bind(member.season_number)
            .bind(member.episode_number)
            .bind(detected_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_duplicates(&self) -> Result<Vec<DuplicateGroupMember>> {
        let rows = query_as::<_, DuplicateRow>(
            r#"
            SELECT group_key, group_name, item_id, item_name, kind, size, path,
                   series_name, season_number, episode_number
            FROM duplicate_items
            ORDER BY rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DuplicateGroupMember::try_from).collect()
    }

    async fn replace_scrape_anomalies(&self, anomalies: &[ScrapeAnomaly]) -> Result<()> {
        let detected_at = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        query("DELETE FROM scrape_anomalies").execute(&mut *tx).await?;

        for anomaly in anomalies {
            query(
                r#"
                INSERT OR REPLACE INTO scrape_anomalies (
                    item_id, item_name, kind, missing_poster, missing_external_id, detected_at
                ) VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&anomaly.item_id)
            .bind(&anomaly.item_name)
            .bind(anomaly.kind.as_str())
            .bind(anomaly.missing_poster)
            .bind(anomaly.missing_external_id)
            .bind(detected_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_scrape_anomalies(&self) -> Result<Vec<ScrapeAnomaly>> {
        let rows = query_as::<_, ScrapeAnomalyRow>(
            r#"
            SELECT item_id, item_name, kind, missing_poster, missing_external_id
            FROM scrape_anomalies
            ORDER BY rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ScrapeAnomaly::try_from).collect()
    }

    async fn replace_episode_mapping_anomalies(
        &self,
        anomalies: &[EpisodeMappingAnomaly],
    ) -> Result<()> {
        let detected_at = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        query("DELETE FROM episode_mapping_anomalies")
            .execute(&mut *tx)
            .await?;

        for anomaly in anomalies {
            query(
                r#"
                INSERT OR REPLACE INTO episode_mapping_anomalies (
                    show_id, series_id, series_name, season_number, local_count,
                    external_count, difference, local_season_count,
                    external_season_count, detected_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&anomaly.show_id)
            .bind(&anomaly.series_id)
            .bind(&anomaly.series_name)
            .bind(anomaly.season_number)
            .bind(anomaly.local_count)
            .bind(anomaly.external_count)
            .bind(anomaly.difference)
            .bind(anomaly.local_season_count)
            .bind(anomaly.external_season_count)
            .bind(detected_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_episode_mapping_anomalies(&self) -> Result<Vec<EpisodeMappingAnomaly>> {
        let anomalies = query_as::<_, EpisodeMappingAnomaly>(
            r#"
            SELECT show_id, series_id, series_name, season_number, local_count,
                   external_count, difference, local_season_count, external_season_count
            FROM episode_mapping_anomalies
            ORDER BY rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(anomalies)
    }
}
