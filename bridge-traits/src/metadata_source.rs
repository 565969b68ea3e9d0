//! External Metadata Provider Abstraction
//!
//! Per-show season listings from a third-party TV database, used as ground
//! truth when checking local episode counts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Season summary reported by the external provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonInfo {
    pub season_number: i32,
    pub episode_count: i32,
    pub name: Option<String>,
}

impl SeasonInfo {
    pub fn new(season_number: i32, episode_count: i32) -> Self {
        Self {
            season_number,
            episode_count,
            name: None,
        }
    }
}

/// Season lookups against an external metadata provider.
///
/// Implementations retry rate-limited requests on their own and report
/// credential problems as [`BridgeError::Authentication`](crate::error::BridgeError::Authentication)
/// so callers can stop after repeated failures.
#[async_trait]
pub trait ExternalMetadataSource: Send + Sync {
    /// Fetch the season list of a show by its external id.
    async fn fetch_show_seasons(&self, show_id: &str) -> Result<Vec<SeasonInfo>>;
}
