//! Scrape completeness checks for movies and series.
//!
//! Episodes are skipped: their artwork and ids come from the series.

use bridge_traits::media_source::ItemKind;
use core_library::{MediaItem, ScrapeAnomaly};

/// Movies and series missing a poster, both recognized external ids, or both.
pub fn detect_scrape_anomalies(items: &[MediaItem]) -> Vec<ScrapeAnomaly> {
    items
        .iter()
        .filter(|item| matches!(item.kind, ItemKind::Movie | ItemKind::Series))
        .filter_map(|item| {
            let missing_poster = !item.has_primary_image;
            let missing_external_id = item.tmdb_id().is_none() && item.imdb_id().is_none();

            (missing_poster || missing_external_id).then(|| ScrapeAnomaly {
                item_id: item.id.clone(),
                item_name: item.name.clone(),
                kind: item.kind,
                missing_poster,
                missing_external_id,
            })
        })
        .collect()
}
