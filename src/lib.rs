//! Workspace entry crate.
//!
//! Re-exports the `core-service` façade so hosts can depend on a single crate
//! and toggle the `desktop-shims` feature here.

pub use core_service::*;
