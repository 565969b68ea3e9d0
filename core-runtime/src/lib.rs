//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the catalog core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus for sync and analysis progress

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
