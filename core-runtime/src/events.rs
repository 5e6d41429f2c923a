//! Sync and cache notifications for the host.
//!
//! The reconciler, the tombstone collector and the coordinator publish
//! [`CoreEvent`]s on one [`EventBus`]; the host's sync-status indicator
//! subscribes. Delivery is best effort: publishing with nobody listening is
//! not an error for the publisher, and a slow subscriber sees
//! `RecvError::Lagged` and keeps going.
//!
//! ```rust
//! use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::default();
//! let mut indicator = bus.subscribe();
//!
//! bus.emit(CoreEvent::Cache(CacheEvent::TombstonesPurged { count: 2 })).ok();
//! assert_eq!(
//!     indicator.recv().await.unwrap(),
//!     CoreEvent::Cache(CacheEvent::TombstonesPurged { count: 2 })
//! );
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

const CHANNEL_CAPACITY: usize = 128;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Sync(SyncEvent),
    Cache(CacheEvent),
}

/// Status shown by the host's sync indicator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatusKind {
    #[default]
    Idle,
    Syncing,
    Success,
    Error,
}

impl fmt::Display for SyncStatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStatusKind::Idle => "idle",
            SyncStatusKind::Syncing => "syncing",
            SyncStatusKind::Success => "success",
            SyncStatusKind::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    PassStarted {
        entity_type: String,
        candidates: u64,
    },
    PassCompleted {
        entity_type: String,
        pushed: u64,
        /// Pending writes dropped for a newer remote copy
        discarded: u64,
        failed: u64,
        /// Tombstones removed after the remote confirmed the delete
        purged: u64,
        /// Still backing off, or parked for review
        skipped: u64,
    },
    RecordFailed {
        entity_type: String,
        id: String,
        message: String,
        retryable: bool,
        retry_count: u32,
    },
    /// Sent once, on the attempt that reaches the retry ceiling.
    RetriesExhausted {
        entity_type: String,
        id: String,
        retry_count: u32,
    },
    /// The remote refused the payload; automatic retries stop.
    NeedsReview {
        entity_type: String,
        id: String,
        message: String,
    },
    ConflictDiscarded {
        entity_type: String,
        id: String,
    },
    StatusChanged {
        status: SyncStatusKind,
        pending_count: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    TombstonesPurged { count: u64 },
    /// All stores wiped on sign-out
    DataCleared,
}

/// Cloneable handle to one broadcast channel of [`CoreEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// `capacity` is how far a subscriber may fall behind before it lags.
    pub fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity.max(1)).0,
        }
    }

    /// Number of subscribers reached. Errs only when nobody subscribes.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.tx.send(event)
    }

    /// Future events only; nothing is replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(CHANNEL_CAPACITY)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus({} subscribers)", self.subscriber_count())
    }
}
