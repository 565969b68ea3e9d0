//! # Reconciliation
//!
//! Data-quality checks over the cached catalog.
//!
//! ## Components
//!
//! - **Duplicates** (`duplicates`): movies sharing an external id, episodes sharing resolved numbers
//! - **Scrape** (`scrape`): movies and series missing a poster or external ids
//! - **Episode mapping** (`episode_mapping`): local season counts vs. the metadata provider
//! - **Scanner** (`scanner`): fetches and caches provider seasons on a worker pool
//! - **Analysis Service** (`service`): runs a check, stores its anomalies, reports events
//!
//! The detectors are pure functions over a snapshot; only the scanner and the
//! service touch the cache or the network.

pub mod duplicates;
pub mod episode_mapping;
pub mod error;
pub mod scanner;
pub mod scrape;
pub mod service;

pub use duplicates::detect_duplicates;
pub use episode_mapping::{detect_episode_mapping_anomalies, ShowSnapshot};
pub use error::{ReconcileError, Result};
pub use scanner::{EpisodeMappingScanner, ScanSummary};
pub use scrape::detect_scrape_anomalies;
pub use service::AnalysisService;
