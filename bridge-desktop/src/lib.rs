//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for servers and desktop hosts.
//!
//! - `HttpClient` using `reqwest`, shared by the media server and metadata clients
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::ReqwestHttpClient;
//! use std::sync::Arc;
//!
//! let http_client = Arc::new(ReqwestHttpClient::new()?);
//! let emby = EmbyConnector::from_config(http_client.clone(), &config.media_server);
//! let tmdb = TmdbClient::from_config(http_client, &config.metadata)?;
//! ```

mod http;

pub use http::ReqwestHttpClient;
