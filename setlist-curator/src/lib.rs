//! setlist-curator library interface
//!
//! Playlist reconciliation and allocation engine. A curation run:
//! - filters the current remote collection ([`filter`])
//! - fills open slots from a suggestion service ([`suggest`])
//! - builds the target order around pinned items ([`allocation`])
//! - explains the change ([`diff`])
//! - converges the remote collection onto the target ([`sync`])
//!
//! [`pipeline::Curator`] wires the stages to remote access, credentials and
//! the event bus.

pub mod allocation;
pub mod credentials;
pub mod diff;
pub mod error;
pub mod filter;
pub mod matching;
pub mod pipeline;
pub mod remote;
pub mod retry;
pub mod suggest;
pub mod sync;
pub mod types;

#[cfg(test)]
mod test_support;

pub use crate::error::{CurationError, CurationResult};
pub use crate::pipeline::{Curator, Estimate, ReconcileSummary, RunOutcome, RunReport};
