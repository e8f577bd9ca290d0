//! # MCB Common Library
//!
//! Shared code for the MCB upload client:
//! - Core data model (items, statuses, image snapshots)
//! - Wire protocol for the upload channel (tagged-union messages)
//! - Error types
//! - Configuration loading

pub mod config;
pub mod error;
pub mod messages;
pub mod types;

pub use error::{Error, Result};
