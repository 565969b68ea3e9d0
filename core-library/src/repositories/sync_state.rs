//! Key/value sync bookkeeping

use crate::error::{LibraryError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{query, query_as, SqlitePool};

const LAST_SYNCED_AT: &str = "last_synced_at";

#[async_trait]
pub trait SyncStateRepository: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Start instant of the last sync that completed successfully.
    async fn last_synced_at(&self) -> Result<Option<DateTime<Utc>>> {
        match self.get(LAST_SYNCED_AT).await? {
            Some(raw) => DateTime::parse_from_rfc3339(&raw)
                .map(|at| Some(at.with_timezone(&Utc)))
                .map_err(|e| LibraryError::InvalidInput {
                    field: LAST_SYNCED_AT.to_string(),
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    async fn set_last_synced_at(&self, at: DateTime<Utc>) -> Result<()> {
        self.set(LAST_SYNCED_AT, &at.to_rfc3339()).await
    }

    async fn clear(&self) -> Result<()>;
}

pub struct SqliteSyncStateRepository {
    pool: SqlitePool,
}

impl SqliteSyncStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SyncStateRepository for SqliteSyncStateRepository {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = query_as("SELECT value FROM sync_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        query(
            r#"
            INSERT INTO sync_state (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        query("DELETE FROM sync_state").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_last_synced_at_roundtrip() {
        let repo = SqliteSyncStateRepository::new(create_test_pool().await.unwrap());
        assert_eq!(repo.last_synced_at().await.unwrap(), None);

        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        repo.set_last_synced_at(at).await.unwrap();
        assert_eq!(repo.last_synced_at().await.unwrap(), Some(at));

        let later = at + chrono::Duration::hours(2);
        repo.set_last_synced_at(later).await.unwrap();
        assert_eq!(repo.last_synced_at().await.unwrap(), Some(later));
    }

    #[tokio::test]
    async fn test_corrupt_timestamp_is_reported() {
        let repo = SqliteSyncStateRepository::new(create_test_pool().await.unwrap());
        repo.set(LAST_SYNCED_AT, "yesterday").await.unwrap();
        assert!(matches!(
            repo.last_synced_at().await,
            Err(LibraryError::InvalidInput { .. })
        ));

        repo.clear().await.unwrap();
        assert_eq!(repo.get(LAST_SYNCED_AT).await.unwrap(), None);
    }
}
