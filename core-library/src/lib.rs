//! # Catalog Cache
//!
//! Local SQLite mirror of the media server catalog, plus everything derived
//! from it:
//!
//! - `media_items` - one row per movie, series and episode
//! - `seasons` - per-season episode counts, rebuilt after every sync
//! - `sync_state` - when the last successful sync started
//! - external season snapshots fetched from the metadata provider
//! - the three anomaly sets written by the analyzers
//!
//! Season and episode numbers are resolved from file paths on write (see
//! [`numbering`]), so every reader groups episodes the same way.

pub mod db;
pub mod error;
pub mod models;
pub mod numbering;
pub mod repositories;
pub mod store;

pub use error::{LibraryError, Result};
pub use models::{
    DuplicateGroupMember, EpisodeMappingAnomaly, ExternalSeasonSnapshot, KindCounts, MediaItem,
    ScrapeAnomaly, SeasonRecord,
};
pub use store::CacheStore;
