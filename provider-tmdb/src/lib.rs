//! TMDB season lookups for the episode mapping scan.

pub mod client;
pub mod error;
pub mod types;

pub use client::TmdbClient;
pub use error::{Result, TmdbError};
