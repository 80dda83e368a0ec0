//! Curation progress events and the in-process event bus
//!
//! The curator reports progress as it works through a collection. Delivery is
//! fire-and-forget: a missing or lagging subscriber never affects curation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Curation event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CurationEvent {
    /// A run over one or more collections started
    RunStarted {
        run_id: Uuid,
        collection_count: usize,
        dry_run: bool,
        timestamp: DateTime<Utc>,
    },

    /// Progress within one collection
    Progress {
        run_id: Uuid,
        collection_id: String,
        /// 0-100
        percent: u8,
        step: String,
        timestamp: DateTime<Utc>,
    },

    /// A target item could not be found during reordering
    ConsistencyFault {
        run_id: Uuid,
        collection_id: String,
        target_index: usize,
        item_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Collection curated successfully
    CollectionCompleted {
        run_id: Uuid,
        collection_id: String,
        added: usize,
        removed: usize,
        dry_run: bool,
        timestamp: DateTime<Utc>,
    },

    /// Collection curation failed
    CollectionFailed {
        run_id: Uuid,
        collection_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The owner's credential is permanently invalid and must be re-authorised
    CredentialInvalid {
        run_id: Uuid,
        owner: String,
        collection_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// All collections processed
    RunCompleted {
        run_id: Uuid,
        succeeded: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },
}

impl CurationEvent {
    /// Collection the event refers to, if any
    pub fn collection_id(&self) -> Option<&str> {
        match self {
            Self::Progress { collection_id, .. }
            | Self::ConsistencyFault { collection_id, .. }
            | Self::CollectionCompleted { collection_id, .. }
            | Self::CollectionFailed { collection_id, .. }
            | Self::CredentialInvalid { collection_id, .. } => Some(collection_id),
            Self::RunStarted { .. } | Self::RunCompleted { .. } => None,
        }
    }

    /// True for events that end a collection or a run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::CollectionCompleted { .. }
                | Self::CollectionFailed { .. }
                | Self::RunCompleted { .. }
        )
    }
}

/// Broadcast bus for curation events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CurationEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<CurationEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: CurationEvent,
    ) -> Result<usize, broadcast::error::SendError<CurationEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: CurationEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
