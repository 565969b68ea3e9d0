//! # Emby Provider
//!
//! Implements `RemoteMediaSource` for Emby and Jellyfin servers.
//!
//! ## Overview
//!
//! This module provides:
//! - Paginated `/Items` listing restricted to movies, series and episodes
//! - Delta listing via `MinDateLastSaved`
//! - Id-only listing for deleted-item detection
//! - Item and media version deletion with fallback endpoints
//! - API key authentication through the `X-Emby-Token` header

pub mod connector;
pub mod error;
pub mod types;

pub use connector::EmbyConnector;
pub use error::{EmbyError, Result};
