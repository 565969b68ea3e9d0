//! TMDB response types

use bridge_traits::metadata_source::SeasonInfo;
use serde::Deserialize;

/// `GET /tv/{id}`, trimmed to the season list
#[derive(Debug, Clone, Deserialize)]
pub struct TvDetails {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub seasons: Vec<TvSeason>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TvSeason {
    pub season_number: i32,
    /// Missing for seasons TMDB has not filled in yet
    #[serde(default)]
    pub episode_count: Option<i32>,
    #[serde(default)]
    pub name: Option<String>,
}

impl From<TvSeason> for SeasonInfo {
    fn from(season: TvSeason) -> Self {
        SeasonInfo {
            season_number: season.season_number,
            episode_count: season.episode_count.unwrap_or(0),
            name: season.name,
        }
    }
}
