//! Duplicate detection.
//!
//! Movies are the same title when they share an external id (TMDB first,
//! IMDB otherwise). Episodes are the same episode when they share a series
//! and resolved season/episode numbers. Series never form groups.

use bridge_traits::media_source::ItemKind;
use core_library::{DuplicateGroupMember, MediaItem};
use std::collections::BTreeMap;

/// Identity an item is grouped under, or `None` when it has none.
fn group_key(item: &MediaItem) -> Option<String> {
    match item.kind {
        ItemKind::Movie => item
            .tmdb_id()
            .map(|id| format!("tmdb:{id}"))
            .or_else(|| item.imdb_id().map(|id| format!("imdb:{id}"))),
        ItemKind::Episode => {
            let series_id = item.series_id.as_deref()?;
            let season = item.resolved_season?;
            let episode = item.resolved_episode?;
            Some(format!("episode:{series_id}:{season:04}:{episode:04}"))
        }
        ItemKind::Series => None,
    }
}

fn group_name(first: &MediaItem) -> String {
    match (first.kind, first.resolved_season, first.resolved_episode) {
        (ItemKind::Episode, Some(season), Some(episode)) => format!(
            "{} S{season:02}E{episode:02}",
            first.series_name.as_deref().unwrap_or(&first.name)
        ),
        _ => first.name.clone(),
    }
}

/// One row per member of every group with at least two items.
///
/// Groups come out ordered by key, members in input order.
pub fn detect_duplicates(items: &[MediaItem]) -> Vec<DuplicateGroupMember> {
    let mut groups: BTreeMap<String, Vec<&MediaItem>> = BTreeMap::new();
    for item in items {
        if let Some(key) = group_key(item) {
            groups.entry(key).or_default().push(item);
        }
    }

    groups
        .into_iter()
        .filter(|(_, members)| members.len() >= 2)
        .flat_map(|(key, members)| {
            let name = group_name(members[0]);
            members
                .into_iter()
                .map(move |item| DuplicateGroupMember {
                    group_key: key.clone(),
                    group_name: name.clone(),
                    item_id: item.id.clone(),
                    item_name: item.name.clone(),
                    kind: item.kind,
                    size: item.size,
                    path: item.path.clone(),
                    series_name: item.series_name.clone(),
                    season_number: item.resolved_season,
                    episode_number: item.resolved_episode,
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::media_source::RemoteItem;

    fn movie(id: &str, tmdb: Option<&str>, imdb: Option<&str>) -> MediaItem {
        let mut remote = RemoteItem::new(id, format!("Movie {id}"), ItemKind::Movie);
        if let Some(tmdb) = tmdb {
            remote = remote.with_provider_id("Tmdb", tmdb);
        }
        if let Some(imdb) = imdb {
            remote = remote.with_provider_id("Imdb", imdb);
        }
        MediaItem::from_remote(remote, 0)
    }

    fn episode(id: &str, series: &str, path: &str) -> MediaItem {
        let remote = RemoteItem::new(id, format!("Episode {id}"), ItemKind::Episode)
            .with_series(series, "Long Show")
            .with_indexes(Some(20), Some(1))
            .with_path(path);
        MediaItem::from_remote(remote, 0)
    }

    #[test]
    fn test_movies_sharing_external_id_form_one_group() {
        let items = vec![
            movie("a", Some("42"), None),
            movie("b", Some("7"), None),
            movie("c", Some("42"), Some("tt1")),
            movie("d", Some("42"), None),
        ];

        let members = detect_duplicates(&items);

        assert_eq!(members.len(), 3);
        assert!(members.iter().all(|m| m.group_key == "tmdb:42"));
        let ids: Vec<&str> = members.iter().map(|m| m.item_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "d"]);
        assert_eq!(members[0].group_name, "Movie a");
    }

    #[test]
    fn test_imdb_is_used_when_tmdb_is_missing() {
        let items = vec![
            movie("a", None, Some("tt0113277")),
            movie("b", None, Some("tt0113277")),
            movie("c", None, None),
            movie("d", None, None),
        ];

        let members = detect_duplicates(&items);

        assert_eq!(members.len(), 2);
        assert_eq!(members[0].group_key, "imdb:tt0113277");
    }

    #[test]
    fn test_episodes_group_by_resolved_numbers() {
        // Same reported indexes everywhere; only the paths tell them apart.
        let items = vec![
            episode("e1", "s1", "/tv/Long Show/Season 400/Long.Show.S400E02.mkv"),
            episode("e2", "s1", "/tv/Long Show/Season 400/Long.Show.S400E03.mkv"),
            episode("e3", "s1", "/tv/Long Show/Season 400/Long.Show.S400E02.1080p.mkv"),
            episode("e4", "s2", "/tv/Other/Season 400/Other.S400E02.mkv"),
        ];

        let members = detect_duplicates(&items);

        let ids: Vec<&str> = members.iter().map(|m| m.item_id.as_str()).collect();
        assert_eq!(ids, vec!["e1", "e3"]);
        assert_eq!(members[0].group_name, "Long Show S400E02");
        assert_eq!(members[1].season_number, Some(400));
        assert_eq!(members[1].episode_number, Some(2));
    }

    #[test]
    fn test_series_never_grouped() {
        let series = |id: &str| {
            MediaItem::from_remote(
                RemoteItem::new(id, "Show", ItemKind::Series).with_provider_id("Tmdb", "1"),
                0,
            )
        };
        assert!(detect_duplicates(&[series("s1"), series("s2")]).is_empty());
    }

    #[test]
    fn test_groups_are_ordered_by_key() {
        let items = vec![
            movie("z1", Some("900"), None),
            movie("a1", Some("100"), None),
            movie("z2", Some("900"), None),
            movie("a2", Some("100"), None),
        ];

        let keys: Vec<String> = detect_duplicates(&items)
            .into_iter()
            .map(|m| m.group_key)
            .collect();
        assert_eq!(keys, vec!["tmdb:100", "tmdb:100", "tmdb:900", "tmdb:900"]);
    }
}
