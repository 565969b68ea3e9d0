//! Season/episode count comparison against the metadata provider.
//!
//! A show is mapped correctly when every local season above 0 exists on the
//! provider with the same number of episodes. Local specials (season 0 and
//! below) are never compared. Provider seasons without episodes do not exist;
//! every other provider season, specials included, counts towards the show's
//! external season total.

use core_library::{EpisodeMappingAnomaly, ExternalSeasonSnapshot, SeasonRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Local and provider season counts of one series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowSnapshot {
    /// Provider id of the show (TMDB)
    pub show_id: String,
    pub series_id: String,
    pub series_name: String,
    pub local_seasons: Vec<SeasonRecord>,
    pub external_seasons: Vec<ExternalSeasonSnapshot>,
}

pub fn detect_episode_mapping_anomalies(shows: &[ShowSnapshot]) -> Vec<EpisodeMappingAnomaly> {
    shows.iter().flat_map(show_anomalies).collect()
}

fn show_anomalies(show: &ShowSnapshot) -> Vec<EpisodeMappingAnomaly> {
    let local: BTreeMap<i32, i32> = show
        .local_seasons
        .iter()
        .filter(|season| season.season_number > 0)
        .map(|season| (season.season_number, season.episode_count))
        .collect();

    let external: BTreeMap<i32, i32> = show
        .external_seasons
        .iter()
        .filter(|season| season.episode_count > 0)
        .map(|season| (season.season_number, season.episode_count))
        .collect();

    let local_season_count = local.len() as i32;
    let external_season_count = external.len() as i32;

    local
        .iter()
        .filter_map(|(&season_number, &local_count)| {
            let external_count = external.get(&season_number).copied().unwrap_or(0);
            (external_count == 0 || external_count != local_count).then(|| EpisodeMappingAnomaly {
                show_id: show.show_id.clone(),
                series_id: show.series_id.clone(),
                series_name: show.series_name.clone(),
                season_number,
                local_count,
                external_count,
                difference: (local_count - external_count).abs(),
                local_season_count,
                external_season_count,
            })
        })
        .collect()
}
