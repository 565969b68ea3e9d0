//! # Host Bridge Traits
//!
//! Capability contracts between the catalog core and the outside world.
//!
//! ## Traits
//!
//! - [`RemoteMediaSource`](media_source::RemoteMediaSource) - Paginated catalog access to the media server
//! - [`ExternalMetadataSource`](metadata_source::ExternalMetadataSource) - Season listings from a TV database
//! - [`HttpClient`](http::HttpClient) - Async HTTP operations used by the provider crates
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Implementations should:
//!
//! - Convert transport-specific errors to `BridgeError`
//! - Report credential problems as `BridgeError::Authentication`, never as a generic failure
//! - Report throttling as `BridgeError::RateLimited` with the server's wait hint
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds so implementations can be shared
//! between the sync producer task and worker pool tasks.

pub mod error;
pub mod http;
pub mod media_source;
pub mod metadata_source;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use media_source::{ItemKind, ItemPage, RemoteItem, RemoteMediaSource};
pub use metadata_source::{ExternalMetadataSource, SeasonInfo};
pub use time::{Clock, ManualClock, SystemClock};
