//! Cache models
//!
//! `MediaItem` mirrors one remote catalog entry. Everything else in the cache
//! (season aggregates, metadata snapshots, anomaly sets) is derived and can be
//! rebuilt from `media_items` plus the external provider.

use bridge_traits::media_source::{ItemKind, RemoteItem};
use bridge_traits::metadata_source::SeasonInfo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{LibraryError, Result};
use crate::numbering;

/// External id namespaces recognized for identity and scrape checks.
pub const TMDB_NAMESPACE: &str = "tmdb";
pub const IMDB_NAMESPACE: &str = "imdb";

/// One cached catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: String,
    pub name: String,
    pub kind: ItemKind,
    pub has_primary_image: bool,
    /// External ids keyed by lowercase namespace
    pub provider_ids: BTreeMap<String, String>,
    pub size: Option<i64>,
    /// Episode number as reported by the server
    pub index_number: Option<i32>,
    /// Season number as reported by the server
    pub parent_index_number: Option<i32>,
    pub series_id: Option<String>,
    pub series_name: Option<String>,
    pub path: Option<String>,
    /// Season number after path-based resolution (episodes only)
    pub resolved_season: Option<i32>,
    /// Episode number after path-based resolution (episodes only)
    pub resolved_episode: Option<i32>,
    /// Unix timestamp of the write that produced this row
    pub cached_at: i64,
}

impl MediaItem {
    /// Convert a remote item, normalizing external id namespaces and resolving
    /// season/episode numbers.
    pub fn from_remote(remote: RemoteItem, cached_at: i64) -> Self {
        let provider_ids = remote
            .provider_ids
            .into_iter()
            .filter(|(_, value)| !value.trim().is_empty())
            .map(|(namespace, value)| (namespace.to_ascii_lowercase(), value.trim().to_string()))
            .collect();

        let resolved = match remote.kind {
            ItemKind::Episode => numbering::resolve(
                remote.path.as_deref(),
                remote.parent_index_number,
                remote.index_number,
            ),
            ItemKind::Movie | ItemKind::Series => numbering::ResolvedNumbering::default(),
        };

        Self {
            id: remote.id,
            name: remote.name,
            kind: remote.kind,
            has_primary_image: remote.has_primary_image,
            provider_ids,
            size: remote.size,
            index_number: remote.index_number,
            parent_index_number: remote.parent_index_number,
            series_id: remote.series_id,
            series_name: remote.series_name,
            path: remote.path,
            resolved_season: resolved.season,
            resolved_episode: resolved.episode,
            cached_at,
        }
    }

    pub fn provider_id(&self, namespace: &str) -> Option<&str> {
        self.provider_ids
            .get(&namespace.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn tmdb_id(&self) -> Option<&str> {
        self.provider_id(TMDB_NAMESPACE)
    }

    pub fn imdb_id(&self) -> Option<&str> {
        self.provider_id(IMDB_NAMESPACE)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("Media item id cannot be empty".to_string());
        }
        if self.kind == ItemKind::Episode && self.series_id.as_deref().is_some_and(str::is_empty) {
            return Err(format!("Episode {} has an empty series id", self.id));
        }
        Ok(())
    }
}

/// Database row shape of `media_items`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct MediaItemRow {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub has_primary_image: bool,
    pub provider_ids: String,
    pub size: Option<i64>,
    pub index_number: Option<i32>,
    pub parent_index_number: Option<i32>,
    pub series_id: Option<String>,
    pub series_name: Option<String>,
    pub path: Option<String>,
    pub resolved_season: Option<i32>,
    pub resolved_episode: Option<i32>,
    pub cached_at: i64,
}

impl TryFrom<MediaItemRow> for MediaItem {
    type Error = LibraryError;

    fn try_from(row: MediaItemRow) -> Result<Self> {
        let kind = row.kind.parse::<ItemKind>()?;
        let provider_ids = serde_json::from_str(&row.provider_ids)?;

        Ok(Self {
            id: row.id,
            name: row.name,
            kind,
            has_primary_image: row.has_primary_image,
            provider_ids,
            size: row.size,
            index_number: row.index_number,
            parent_index_number: row.parent_index_number,
            series_id: row.series_id,
            series_name: row.series_name,
            path: row.path,
            resolved_season: row.resolved_season,
            resolved_episode: row.resolved_episode,
            cached_at: row.cached_at,
        })
    }
}

/// Episode count of one season of one series, derived from `media_items`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SeasonRecord {
    pub series_id: String,
    pub season_number: i32,
    pub series_name: Option<String>,
    pub episode_count: i32,
}

/// Cached season summary from the external metadata provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExternalSeasonSnapshot {
    pub show_id: String,
    pub season_number: i32,
    pub episode_count: i32,
    pub season_name: Option<String>,
}

impl ExternalSeasonSnapshot {
    pub fn from_season_info(show_id: &str, season: &SeasonInfo) -> Self {
        Self {
            show_id: show_id.to_string(),
            season_number: season.season_number,
            episode_count: season.episode_count,
            season_name: season.name.clone(),
        }
    }
}

/// Item counts per kind, for dashboards and sync summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCounts {
    pub movies: i64,
    pub series: i64,
    pub episodes: i64,
}

impl KindCounts {
    pub fn total(&self) -> i64 {
        self.movies + self.series + self.episodes
    }
}

// ============================================================================
// Anomaly records
// ============================================================================

/// One member of a duplicate group. A group of N items produces N rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroupMember {
    pub group_key: String,
    pub group_name: String,
    pub item_id: String,
    pub item_name: String,
    pub kind: ItemKind,
    pub size: Option<i64>,
    pub path: Option<String>,
    pub series_name: Option<String>,
    pub season_number: Option<i32>,
    pub episode_number: Option<i32>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct DuplicateRow {
    pub group_key: String,
    pub group_name: String,
    pub item_id: String,
    pub item_name: String,
    pub kind: String,
    pub size: Option<i64>,
    pub path: Option<String>,
    pub series_name: Option<String>,
    pub season_number: Option<i32>,
    pub episode_number: Option<i32>,
}

impl TryFrom<DuplicateRow> for DuplicateGroupMember {
    type Error = LibraryError;

    fn try_from(row: DuplicateRow) -> Result<Self> {
        Ok(Self {
            kind: row.kind.parse::<ItemKind>()?,
            group_key: row.group_key,
            group_name: row.group_name,
            item_id: row.item_id,
            item_name: row.item_name,
            size: row.size,
            path: row.path,
            series_name: row.series_name,
            season_number: row.season_number,
            episode_number: row.episode_number,
        })
    }
}

/// Movie or series with incomplete scrape results. Both flags are independent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeAnomaly {
    pub item_id: String,
    pub item_name: String,
    pub kind: ItemKind,
    pub missing_poster: bool,
    pub missing_external_id: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct ScrapeAnomalyRow {
    pub item_id: String,
    pub item_name: String,
    pub kind: String,
    pub missing_poster: bool,
    pub missing_external_id: bool,
}

impl TryFrom<ScrapeAnomalyRow> for ScrapeAnomaly {
    type Error = LibraryError;

    fn try_from(row: ScrapeAnomalyRow) -> Result<Self> {
        Ok(Self {
            kind: row.kind.parse::<ItemKind>()?,
            item_id: row.item_id,
            item_name: row.item_name,
            missing_poster: row.missing_poster,
            missing_external_id: row.missing_external_id,
        })
    }
}

/// Local season whose episode count disagrees with the metadata provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct EpisodeMappingAnomaly {
    pub show_id: String,
    pub series_id: String,
    pub series_name: String,
    pub season_number: i32,
    pub local_count: i32,
    /// 0 when the provider has no such season
    pub external_count: i32,
    /// Absolute difference between the two counts
    pub difference: i32,
    /// Local seasons numbered above 0
    pub local_season_count: i32,
    /// Provider seasons that have at least one episode
    pub external_season_count: i32,
}
