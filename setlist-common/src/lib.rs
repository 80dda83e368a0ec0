//! # Setlist Common Library
//!
//! Shared code for the setlist curation tools including:
//! - Configuration loading and validation (TOML)
//! - Configuration-facing value types (pinned items, size-limit policies)
//! - Progress event types and the event bus
//! - Error types
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
