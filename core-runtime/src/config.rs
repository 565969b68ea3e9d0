//! # Core Configuration Module
//!
//! Configuration for the catalog core: where the cache lives, how to reach the
//! media server and the metadata provider, and how hard to push them.
//!
//! ## Overview
//!
//! `CoreConfig` is built either programmatically through [`CoreConfigBuilder`]
//! or from a TOML document. Both paths end in [`CoreConfig::validate`], so an
//! unusable configuration fails at startup rather than halfway through a sync.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, MediaServerConfig};
//!
//! let config = CoreConfig::builder()
//!     .database_path("/var/lib/catalog/cache.db")
//!     .media_server(MediaServerConfig::new("http://emby.local:8096", "api-key"))
//!     .build()?;
//! ```
//!
//! ```toml
//! database_path = "/var/lib/catalog/cache.db"
//!
//! [media_server]
//! base_url = "http://emby.local:8096"
//! api_key = "..."
//!
//! [metadata]
//! tmdb_api_key = "..."
//!
//! [sync]
//! batch_size = 500
//! timeout_secs = 3600
//! ```

use crate::error::{Error, Result};
use crate::logging::LoggingConfig;
use bridge_traits::http::HttpClient;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Remote media server connection settings.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct MediaServerConfig {
    /// Server root, e.g. `http://emby.local:8096`
    pub base_url: String,
    pub api_key: String,
    /// Items requested per listing page
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_page_size() -> u32 {
    200
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl MediaServerConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            page_size: default_page_size(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "Media server URL must start with http:// or https://, got '{}'",
                self.base_url
            )));
        }
        if self.api_key.trim().is_empty() {
            return Err(Error::Config(
                "Media server API key cannot be empty".to_string(),
            ));
        }
        if self.page_size == 0 || self.page_size > 10_000 {
            return Err(Error::Config(
                "Media server page size must be between 1 and 10,000".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for MediaServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaServerConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("page_size", &self.page_size)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// External metadata provider (TMDB) settings.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MetadataApiConfig {
    /// TMDB v3 API key or v4 read access token. Episode mapping checks are
    /// unavailable without it.
    pub tmdb_api_key: Option<String>,
    pub tmdb_base_url: String,
    /// Attempts per lookup when the provider answers 429
    pub max_attempts: u32,
    /// Upper bound on a single `Retry-After` wait
    pub max_retry_wait_secs: u64,
    /// Minimum spacing between requests
    pub rate_limit_delay_ms: u64,
}

impl Default for MetadataApiConfig {
    fn default() -> Self {
        Self {
            tmdb_api_key: None,
            tmdb_base_url: "https://api.themoviedb.org/3".to_string(),
            max_attempts: 3,
            max_retry_wait_secs: 30,
            rate_limit_delay_ms: 50,
        }
    }
}

impl MetadataApiConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tmdb_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.tmdb_api_key = Some(api_key.into());
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_rate_limit_delay_ms(mut self, delay_ms: u64) -> Self {
        self.rate_limit_delay_ms = delay_ms;
        self
    }

    pub fn has_tmdb(&self) -> bool {
        self.tmdb_api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 || self.max_attempts > 10 {
            return Err(Error::Config(
                "Metadata max_attempts must be between 1 and 10".to_string(),
            ));
        }
        if self.max_retry_wait_secs > 300 {
            return Err(Error::Config(
                "Metadata max_retry_wait_secs exceeds maximum of 300 seconds".to_string(),
            ));
        }
        if self.rate_limit_delay_ms > 60_000 {
            return Err(Error::Config(
                "Rate limit delay exceeds maximum of 60 seconds (60,000ms)".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for MetadataApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataApiConfig")
            .field(
                "tmdb_api_key",
                &self.tmdb_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("tmdb_base_url", &self.tmdb_base_url)
            .field("max_attempts", &self.max_attempts)
            .field("max_retry_wait_secs", &self.max_retry_wait_secs)
            .field("rate_limit_delay_ms", &self.rate_limit_delay_ms)
            .finish()
    }
}

/// Sync pipeline tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Items per persisted batch
    pub batch_size: usize,
    /// Batches that may wait between the fetch and persist stages
    pub queue_capacity: usize,
    /// Ids per delete statement when purging
    pub purge_batch_size: usize,
    /// Drop secondary indexes while a full sync bulk-inserts
    pub drop_indexes_during_full_sync: bool,
    /// Deadline for one sync run; 0 disables it
    pub timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: 500,
            queue_capacity: 3,
            purge_batch_size: 500,
            drop_indexes_during_full_sync: true,
            timeout_secs: 3600,
        }
    }
}

impl SyncSettings {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.batch_size > 10_000 {
            return Err(Error::Config(
                "Sync batch size must be between 1 and 10,000".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config(
                "Sync queue capacity must be at least 1".to_string(),
            ));
        }
        // SQLite caps bound parameters per statement.
        if self.purge_batch_size == 0 || self.purge_batch_size > 900 {
            return Err(Error::Config(
                "Purge batch size must be between 1 and 900".to_string(),
            ));
        }
        Ok(())
    }
}

/// Worker pool used for concurrent metadata lookups.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WorkerPoolSettings {
    pub min_workers: usize,
    pub max_workers: usize,
    pub idle_timeout_secs: u64,
    pub queue_capacity: usize,
}

impl Default for WorkerPoolSettings {
    fn default() -> Self {
        Self {
            min_workers: 2,
            max_workers: 8,
            idle_timeout_secs: 30,
            queue_capacity: 64,
        }
    }
}

impl WorkerPoolSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 || self.max_workers > 256 {
            return Err(Error::Config(
                "Worker pool max_workers must be between 1 and 256".to_string(),
            ));
        }
        if self.min_workers > self.max_workers {
            return Err(Error::Config(format!(
                "Worker pool min_workers ({}) exceeds max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config(
                "Worker pool queue capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reconciliation analysis settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Consecutive authentication failures that abort an episode mapping scan
    pub max_consecutive_auth_failures: u32,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            max_consecutive_auth_failures: 5,
        }
    }
}

/// Core configuration for the catalog core.
///
/// Use [`CoreConfigBuilder`] or [`CoreConfig::from_toml_str`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the SQLite cache database
    pub database_path: PathBuf,

    /// HTTP client for provider requests (desktop default: reqwest)
    pub http_client: Option<Arc<dyn HttpClient>>,

    pub media_server: MediaServerConfig,
    pub metadata: MetadataApiConfig,
    pub sync: SyncSettings,
    pub worker_pool: WorkerPoolSettings,
    pub analysis: AnalysisSettings,
    pub logging: LoggingConfig,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("http_client", &self.http_client.as_ref().map(|_| "HttpClient"))
            .field("media_server", &self.media_server)
            .field("metadata", &self.metadata)
            .field("sync", &self.sync)
            .field("worker_pool", &self.worker_pool)
            .field("analysis", &self.analysis)
            .field("logging", &self.logging)
            .finish()
    }
}

/// On-disk shape of the configuration file.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    database_path: PathBuf,
    media_server: MediaServerConfig,
    #[serde(default)]
    metadata: MetadataApiConfig,
    #[serde(default)]
    sync: SyncSettings,
    #[serde(default)]
    worker_pool: WorkerPoolSettings,
    #[serde(default)]
    analysis: AnalysisSettings,
    #[serde(default)]
    logging: LoggingConfig,
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Parse and validate a TOML configuration document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents)
            .map_err(|e| Error::Config(format!("Invalid configuration file: {}", e)))?;

        CoreConfig::builder()
            .database_path(file.database_path)
            .media_server(file.media_server)
            .metadata(file.metadata)
            .sync(file.sync)
            .worker_pool(file.worker_pool)
            .analysis(file.analysis)
            .logging(file.logging)
            .build()
    }

    /// Read, parse and validate a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read configuration file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        self.media_server.validate()?;
        self.metadata.validate()?;
        self.sync.validate()?;
        self.worker_pool.validate()?;

        if self.analysis.max_consecutive_auth_failures == 0 {
            return Err(Error::Config(
                "max_consecutive_auth_failures must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for [`CoreConfig`] with fail-fast validation.
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    http_client: Option<Arc<dyn HttpClient>>,
    media_server: Option<MediaServerConfig>,
    metadata: Option<MetadataApiConfig>,
    sync: Option<SyncSettings>,
    worker_pool: Option<WorkerPoolSettings>,
    analysis: Option<AnalysisSettings>,
    logging: Option<LoggingConfig>,
}

impl CoreConfigBuilder {
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn media_server(mut self, config: MediaServerConfig) -> Self {
        self.media_server = Some(config);
        self
    }

    pub fn metadata(mut self, config: MetadataApiConfig) -> Self {
        self.metadata = Some(config);
        self
    }

    pub fn sync(mut self, settings: SyncSettings) -> Self {
        self.sync = Some(settings);
        self
    }

    pub fn worker_pool(mut self, settings: WorkerPoolSettings) -> Self {
        self.worker_pool = Some(settings);
        self
    }

    pub fn analysis(mut self, settings: AnalysisSettings) -> Self {
        self.analysis = Some(settings);
        self
    }

    pub fn logging(mut self, config: LoggingConfig) -> Self {
        self.logging = Some(config);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when the database path or media server settings
    /// are missing, or when any section fails validation.
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let media_server = self.media_server.ok_or_else(|| {
            Error::Config(
                "Media server settings are required. Use .media_server() to set them.".to_string(),
            )
        })?;

        let config = CoreConfig {
            database_path,
            http_client: self.http_client,
            media_server,
            metadata: self.metadata.unwrap_or_default(),
            sync: self.sync.unwrap_or_default(),
            worker_pool: self.worker_pool.unwrap_or_default(),
            analysis: self.analysis.unwrap_or_default(),
            logging: self.logging.unwrap_or_default(),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogFormat;

    fn server() -> MediaServerConfig {
        MediaServerConfig::new("http://emby.local:8096", "secret-key")
    }

    #[test]
    fn test_builder_applies_defaults() {
        let config = CoreConfig::builder()
            .database_path("/tmp/catalog.db")
            .media_server(server())
            .build()
            .unwrap();

        assert_eq!(config.sync.batch_size, 500);
        assert_eq!(config.sync.queue_capacity, 3);
        assert_eq!(config.analysis.max_consecutive_auth_failures, 5);
        assert_eq!(config.media_server.page_size, 200);
        assert!(!config.metadata.has_tmdb());
        assert_eq!(config.sync.timeout(), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_builder_requires_database_path() {
        let result = CoreConfig::builder().media_server(server()).build();
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("Database path")));
    }

    #[test]
    fn test_builder_requires_media_server() {
        let result = CoreConfig::builder().database_path("/tmp/x.db").build();
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("Media server")));
    }

    #[test]
    fn test_invalid_sections_rejected() {
        let bad_url = CoreConfig::builder()
            .database_path("/tmp/x.db")
            .media_server(MediaServerConfig::new("emby.local", "key"))
            .build();
        assert!(bad_url.is_err());

        let bad_pool = CoreConfig::builder()
            .database_path("/tmp/x.db")
            .media_server(server())
            .worker_pool(WorkerPoolSettings {
                min_workers: 4,
                max_workers: 2,
                ..Default::default()
            })
            .build();
        assert!(bad_pool.is_err());

        let bad_purge = CoreConfig::builder()
            .database_path("/tmp/x.db")
            .media_server(server())
            .sync(SyncSettings {
                purge_batch_size: 5000,
                ..Default::default()
            })
            .build();
        assert!(bad_purge.is_err());
    }

    #[test]
    fn test_from_toml_str() {
        let config = CoreConfig::from_toml_str(
            r#"
            database_path = "/var/lib/catalog/cache.db"

            [media_server]
            base_url = "https://emby.example.com"
            api_key = "abc123"
            page_size = 100

            [metadata]
            tmdb_api_key = "tmdb-key"
            max_attempts = 4

            [sync]
            batch_size = 250
            drop_indexes_during_full_sync = false

            [worker_pool]
            max_workers = 4

            [logging]
            format = "json"
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.media_server.page_size, 100);
        assert!(config.metadata.has_tmdb());
        assert_eq!(config.metadata.max_attempts, 4);
        assert_eq!(config.sync.batch_size, 250);
        assert_eq!(config.sync.queue_capacity, 3);
        assert!(!config.sync.drop_indexes_during_full_sync);
        assert_eq!(config.worker_pool.max_workers, 4);
        assert_eq!(config.worker_pool.min_workers, 2);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_from_toml_str_rejects_garbage() {
        assert!(CoreConfig::from_toml_str("database_path = ").is_err());
        assert!(CoreConfig::from_toml_str("database_path = \"/tmp/x.db\"").is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = CoreConfig::builder()
            .database_path("/tmp/catalog.db")
            .media_server(server())
            .metadata(MetadataApiConfig::new().with_tmdb_api_key("tmdb-secret"))
            .build()
            .unwrap();

        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret-key"));
        assert!(!debug.contains("tmdb-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
