//! Remote Media Server Abstraction
//!
//! Catalog access to the remote media server whose library is mirrored locally:
//! paginated listing, delta listing, id-only listing and deletion.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{BridgeError, Result};

/// Kind of catalog entry tracked by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ItemKind {
    Movie,
    Series,
    Episode,
}

impl ItemKind {
    /// Every kind the sync pipeline mirrors.
    pub const TRACKED: [ItemKind; 3] = [ItemKind::Movie, ItemKind::Series, ItemKind::Episode];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Movie => "Movie",
            ItemKind::Series => "Series",
            ItemKind::Episode => "Episode",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Movie" => Ok(ItemKind::Movie),
            "Series" => Ok(ItemKind::Series),
            "Episode" => Ok(ItemKind::Episode),
            other => Err(BridgeError::OperationFailed(format!(
                "Unknown item kind: {}",
                other
            ))),
        }
    }
}

/// A catalog entry as reported by the remote server.
///
/// `index_number` and `parent_index_number` are passed through untouched; they
/// are known to be wrong for very long running shows, so consumers resolve
/// season and episode numbers from `path` first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub id: String,
    pub name: String,
    pub kind: ItemKind,
    pub has_primary_image: bool,
    /// External catalog ids keyed by namespace (`Tmdb`, `Imdb`, `Tvdb`, ...)
    pub provider_ids: BTreeMap<String, String>,
    pub size: Option<i64>,
    pub index_number: Option<i32>,
    pub parent_index_number: Option<i32>,
    pub series_id: Option<String>,
    pub series_name: Option<String>,
    pub path: Option<String>,
}

impl RemoteItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: ItemKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            has_primary_image: false,
            provider_ids: BTreeMap::new(),
            size: None,
            index_number: None,
            parent_index_number: None,
            series_id: None,
            series_name: None,
            path: None,
        }
    }

    pub fn with_provider_id(mut self, namespace: impl Into<String>, id: impl Into<String>) -> Self {
        self.provider_ids.insert(namespace.into(), id.into());
        self
    }

    pub fn with_primary_image(mut self, present: bool) -> Self {
        self.has_primary_image = present;
        self
    }

    pub fn with_size(mut self, size: i64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_series(mut self, series_id: impl Into<String>, series_name: impl Into<String>) -> Self {
        self.series_id = Some(series_id.into());
        self.series_name = Some(series_name.into());
        self
    }

    pub fn with_indexes(mut self, season: Option<i32>, episode: Option<i32>) -> Self {
        self.parent_index_number = season;
        self.index_number = episode;
        self
    }
}

/// One page of a listing call.
#[derive(Debug, Clone, Default)]
pub struct ItemPage {
    pub items: Vec<RemoteItem>,
    /// Total number of matching items on the server, not just this page.
    pub total_count: u64,
    /// Records the server returned for this page, including any the
    /// connector skipped. Callers advance `start_index` by this.
    pub consumed: u64,
}

impl ItemPage {
    /// Page where every returned record was kept.
    pub fn new(items: Vec<RemoteItem>, total_count: u64) -> Self {
        let consumed = items.len() as u64;
        Self {
            items,
            total_count,
            consumed,
        }
    }

    pub fn with_consumed(mut self, consumed: u64) -> Self {
        self.consumed = consumed;
        self
    }

    /// Start index of the page following this one.
    pub fn next_start(&self, start_index: u64) -> u64 {
        start_index + self.consumed
    }

    /// Whether a listing that fetched this page from `start_index` is exhausted.
    pub fn is_last(&self, start_index: u64) -> bool {
        self.consumed == 0 || self.next_start(start_index) >= self.total_count
    }
}

/// Catalog access to the remote media server.
///
/// Listing calls are exhausted by advancing `start_index` by each page's
/// `consumed` count until nothing comes back or `total_count` is reached.
/// Deletion calls try a primary endpoint and fall back to a secondary one
/// before reporting failure.
#[async_trait]
pub trait RemoteMediaSource: Send + Sync {
    /// Fetch one page of items restricted to `kinds`.
    async fn page_items(&self, kinds: &[ItemKind], start_index: u64, limit: u32)
        -> Result<ItemPage>;

    /// Fetch one page of items modified after `since`.
    async fn changed_since(
        &self,
        since: DateTime<Utc>,
        kinds: &[ItemKind],
        start_index: u64,
        limit: u32,
    ) -> Result<ItemPage>;

    /// List every item id of the given kinds using a minimal-field query.
    async fn list_all_ids(&self, kinds: &[ItemKind]) -> Result<Vec<String>>;

    /// Delete an item (and its files) on the server.
    async fn delete_item(&self, id: &str) -> Result<()>;

    /// Delete one media version of a multi-version item.
    async fn delete_version(&self, id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_kind_round_trip_strings() {
        for kind in ItemKind::TRACKED {
            assert_eq!(kind.as_str().parse::<ItemKind>().unwrap(), kind);
        }
        assert!("MusicAlbum".parse::<ItemKind>().is_err());
    }

    #[test]
    fn test_remote_item_builder() {
        let item = RemoteItem::new("ep-1", "Pilot", ItemKind::Episode)
            .with_series("series-1", "Show")
            .with_indexes(Some(1), Some(1))
            .with_path("/tv/Show/Season 1/Show.S01E01.mkv");

        assert_eq!(item.series_id.as_deref(), Some("series-1"));
        assert_eq!(item.parent_index_number, Some(1));
        assert!(!item.has_primary_image);
    }

    #[test]
    fn test_page_advances_by_consumed_records() {
        let page = ItemPage::new(vec![RemoteItem::new("m1", "Heat", ItemKind::Movie)], 1203)
            .with_consumed(3);

        assert_eq!(page.next_start(200), 203);
        assert!(!page.is_last(200));
        assert!(page.is_last(1200));
        assert!(ItemPage::new(Vec::new(), 1203).is_last(0));
    }
}
