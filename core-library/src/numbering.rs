//! Season and episode number resolution.
//!
//! The media server's `ParentIndexNumber`/`IndexNumber` fields cannot be
//! trusted for very long running shows: past roughly season 20 every episode
//! comes back with the same wrong pair. The file layout is reliable, so the
//! numbers are read from the path first:
//!
//! 1. season from a `Season <N>` directory, else from an `S<N>E<M>` filename token
//! 2. episode from an `S<N>E<M>` filename token
//! 3. whatever the server reported, when the path carries neither
//!
//! Every place that groups episodes by season or episode goes through
//! [`resolve`], so season aggregates and duplicate detection always agree.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static SEASON_DIRECTORY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[/\\])season[ ._-]*(\d{1,4})(?:[ ._-][^/\\]*)?[/\\]")
        .expect("season directory pattern is valid")
});

static EPISODE_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bs(\d{1,4})[ ._-]?e(\d{1,4})").expect("episode token pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResolvedNumbering {
    pub season: Option<i32>,
    pub episode: Option<i32>,
}

/// Resolve season and episode numbers for an episode.
pub fn resolve(
    path: Option<&str>,
    reported_season: Option<i32>,
    reported_episode: Option<i32>,
) -> ResolvedNumbering {
    let directory_season = path.and_then(season_from_directory);
    let token = path.and_then(episode_token);

    ResolvedNumbering {
        season: directory_season
            .or(token.map(|(season, _)| season))
            .or(reported_season),
        episode: token.map(|(_, episode)| episode).or(reported_episode),
    }
}

/// Season number from a `Season <N>` directory anywhere in `path`.
pub fn season_from_directory(path: &str) -> Option<i32> {
    SEASON_DIRECTORY
        .captures(path)
        .and_then(|captures| captures.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// `(season, episode)` from an `S<N>E<M>` token in the file name of `path`.
pub fn episode_token(path: &str) -> Option<(i32, i32)> {
    let file_name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let captures = EPISODE_TOKEN.captures(file_name)?;
    let season = captures.get(1)?.as_str().parse().ok()?;
    let episode = captures.get(2)?.as_str().parse().ok()?;
    Some((season, episode))
}
