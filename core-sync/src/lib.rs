//! # Sync Module
//!
//! Keeps the local store and the remote in agreement.
//!
//! ## Overview
//!
//! Local writes land in the store as `pending` and return immediately. This
//! module pushes them in the background, pulls remote changes, and cleans up
//! confirmed deletions:
//! - Per-record retry bookkeeping with exponential backoff
//! - Conflict resolution (last-write-wins by default)
//! - Tombstone purging after the retention window
//! - Scheduling on a timer, on reconnect, and on request
//!
//! ## Components
//!
//! - **Sync State Tracker** (`tracker`): Attempt/success/failure history per record
//! - **Retry Policy** (`backoff`): Backoff delays and retry eligibility
//! - **Conflict Policy** (`conflict`): Decides between local and remote versions
//! - **Reconciler** (`reconciler`): Push passes and pulls per entity store
//! - **Tombstone Collector** (`tombstone`): Purges expired confirmed deletions
//! - **Sync Coordinator** (`coordinator`): Background loop and user-facing sync state

pub mod backoff;
pub mod conflict;
pub mod coordinator;
pub mod error;
pub mod reconciler;
pub mod tombstone;
pub mod tracker;

pub use backoff::RetryPolicy;
pub use conflict::{ConflictPolicy, Resolution};
pub use coordinator::{SyncConfig, SyncCoordinator, SyncState};
pub use error::{Result, SyncError};
pub use reconciler::{PassReport, PullReport, Reconciler};
pub use tombstone::{SweepReport, TombstoneCollector};
pub use tracker::{SyncMetadata, SyncStateTracker};
