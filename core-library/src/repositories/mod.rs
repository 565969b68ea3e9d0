//! # Cache Repositories
//!
//! One trait per table family, each with a SQLite implementation over a shared
//! `SqlitePool`. The sync engine and the analyzers only depend on the traits,
//! so tests can swap in failing or recording implementations.
//!
//! - `MediaItemRepository` - the mirrored catalog and its secondary indexes
//! - `SeasonRepository` - per-season episode counts derived from episodes
//! - `SyncStateRepository` - sync bookkeeping such as the last sync instant
//! - `MetadataSnapshotRepository` - season summaries from the metadata provider
//! - `AnomalyRepository` - duplicate, scrape and episode mapping results

pub mod anomaly;
pub mod media_item;
pub mod metadata_snapshot;
pub mod pagination;
pub mod season;
pub mod sync_state;

pub use anomaly::{AnomalyRepository, SqliteAnomalyRepository};
pub use media_item::{MediaItemRepository, SqliteMediaItemRepository, UpsertOutcome};
pub use metadata_snapshot::{MetadataSnapshotRepository, SqliteMetadataSnapshotRepository};
pub use pagination::{Page, PageRequest};
pub use season::{SeasonRepository, SqliteSeasonRepository};
pub use sync_state::{SqliteSyncStateRepository, SyncStateRepository};
