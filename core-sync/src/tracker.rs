//! # Sync State Tracker
//!
//! Per-record sync bookkeeping, kept apart from the domain payloads.
//!
//! Each record that has ever been sent to the remote gets one
//! [`SyncMetadata`] row in the `sync_metadata` store, keyed by
//! `entity_type:entity_id`. Nothing here reads or writes entity payloads, so
//! a failing network can never corrupt or mask the user's data.
//!
//! The reconciler is the only writer.

use bridge_traits::time::Clock;
use chrono::{DateTime, Duration, Utc};
use core_store::schema::sync_metadata_key;
use core_store::{EntityKind, LocalStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;

/// Network-attempt history of one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    pub entity_type: EntityKind,
    pub entity_id: String,
    pub last_sync_attempt: Option<DateTime<Utc>>,
    pub last_sync_success: Option<DateTime<Utc>>,
    pub last_sync_error: Option<String>,
    pub retry_count: u32,
    /// Set when the remote rejected the payload as invalid
    #[serde(default)]
    pub needs_review: bool,
}

impl SyncMetadata {
    pub fn new(entity_type: EntityKind, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
            last_sync_attempt: None,
            last_sync_success: None,
            last_sync_error: None,
            retry_count: 0,
            needs_review: false,
        }
    }

    /// Whether the last push of this record failed
    pub fn is_failing(&self) -> bool {
        self.retry_count > 0 || self.needs_review
    }

    fn newest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_sync_attempt.max(self.last_sync_success)
    }
}

/// Reads and writes [`SyncMetadata`] through the local store.
pub struct SyncStateTracker {
    store: Arc<LocalStore>,
    clock: Arc<dyn Clock>,
}

impl SyncStateTracker {
    pub fn new(store: Arc<LocalStore>) -> Self {
        let clock = store.clock();
        Self { store, clock }
    }

    pub async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<SyncMetadata>> {
        Ok(self.store.get_metadata(&sync_metadata_key(kind.as_str(), id)).await?)
    }

    async fn load(&self, kind: EntityKind, id: &str) -> Result<SyncMetadata> {
        Ok(self
            .get(kind, id)
            .await?
            .unwrap_or_else(|| SyncMetadata::new(kind, id)))
    }

    async fn save(&self, metadata: &SyncMetadata) -> Result<()> {
        let key = sync_metadata_key(metadata.entity_type.as_str(), &metadata.entity_id);
        self.store.put_metadata(&key, metadata).await?;
        Ok(())
    }

    /// Stamp `last_sync_attempt = now`.
    pub async fn record_attempt(&self, kind: EntityKind, id: &str) -> Result<()> {
        let mut metadata = self.load(kind, id).await?;
        metadata.last_sync_attempt = Some(self.clock.now());
        self.save(&metadata).await
    }

    /// Stamp `last_sync_success = now` and clear the failure state.
    pub async fn record_success(&self, kind: EntityKind, id: &str) -> Result<()> {
        let mut metadata = self.load(kind, id).await?;
        metadata.last_sync_success = Some(self.clock.now());
        metadata.last_sync_error = None;
        metadata.retry_count = 0;
        metadata.needs_review = false;
        self.save(&metadata).await
    }

    /// Count one more failure. `last_sync_attempt` is left as recorded by
    /// [`record_attempt`](Self::record_attempt). Returns the new retry count.
    pub async fn record_failure(&self, kind: EntityKind, id: &str, error: &str) -> Result<u32> {
        let mut metadata = self.load(kind, id).await?;
        metadata.retry_count = metadata.retry_count.saturating_add(1);
        metadata.last_sync_error = Some(error.to_string());
        self.save(&metadata).await?;

        debug!(entity_type = %kind, id, retry_count = metadata.retry_count, "Sync failure recorded");
        Ok(metadata.retry_count)
    }

    pub async fn get_retry_count(&self, kind: EntityKind, id: &str) -> Result<u32> {
        Ok(self
            .get(kind, id)
            .await?
            .map_or(0, |metadata| metadata.retry_count))
    }

    /// Hold the record back until someone retries it by hand.
    pub async fn flag_for_review(&self, kind: EntityKind, id: &str) -> Result<()> {
        let mut metadata = self.load(kind, id).await?;
        metadata.needs_review = true;
        self.save(&metadata).await
    }

    /// Clear backoff and the review flag so the next pass picks the record up.
    /// The last error stays for diagnostics.
    pub async fn reset(&self, kind: EntityKind, id: &str) -> Result<()> {
        let Some(mut metadata) = self.get(kind, id).await? else {
            return Ok(());
        };
        metadata.retry_count = 0;
        metadata.needs_review = false;
        self.save(&metadata).await
    }

    /// Remove rows that carry no failure and were last touched before
    /// `now - horizon`. Returns how many were removed.
    pub async fn collect_garbage(&self, horizon: Duration) -> Result<u64> {
        let cutoff = self.clock.now() - horizon;
        let mut removed = 0;

        for metadata in self.store.scan_metadata::<SyncMetadata>().await? {
            let stale = metadata
                .newest_timestamp()
                .map_or(true, |newest| newest < cutoff);
            if !metadata.is_failing() && stale {
                let key = sync_metadata_key(metadata.entity_type.as_str(), &metadata.entity_id);
                if self.store.delete_metadata(&key).await? {
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            debug!(removed, "Stale sync metadata collected");
        }
        Ok(removed)
    }
}
