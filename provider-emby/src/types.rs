//! Emby API response types
//!
//! Only the fields the catalog cache stores are declared; everything else in
//! the payload is ignored.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

/// `/Items` query result
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemsResponse {
    #[serde(default)]
    pub items: Vec<BaseItem>,

    /// Matching items on the server, across all pages
    #[serde(default)]
    pub total_record_count: u64,
}

/// Emby `BaseItemDto`, trimmed
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BaseItem {
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// `Movie`, `Series`, `Episode`, ...
    #[serde(rename = "Type", default)]
    pub item_type: String,

    /// Image type to tag, e.g. `Primary`
    #[serde(default)]
    pub image_tags: HashMap<String, String>,

    #[serde(default)]
    pub provider_ids: BTreeMap<String, String>,

    pub size: Option<i64>,

    /// Episode number as stored by the server
    pub index_number: Option<i32>,

    /// Season number as stored by the server
    pub parent_index_number: Option<i32>,

    pub series_id: Option<String>,
    pub series_name: Option<String>,
    pub path: Option<String>,

    #[serde(default)]
    pub media_sources: Vec<MediaSource>,
}

impl BaseItem {
    pub fn has_primary_image(&self) -> bool {
        self.image_tags.contains_key("Primary")
    }

    /// Item size, falling back to the first media source.
    pub fn effective_size(&self) -> Option<i64> {
        self.size
            .or_else(|| self.media_sources.iter().find_map(|source| source.size))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MediaSource {
    pub id: Option<String>,
    pub size: Option<i64>,
    pub path: Option<String>,
}
