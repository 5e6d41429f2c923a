//! Remote Gateway Abstraction
//!
//! The hosted backend is the authoritative store. The core only ever talks to
//! it through [`RemoteGateway`], so the backend's own query semantics stay out
//! of the cache and sync logic.
//!
//! ## Delivery Guarantees
//!
//! The reconciler delivers writes at least once: an interrupted pass simply
//! pushes the same record again on the next run. Implementations must
//! therefore upsert keyed by the record `id`, so a repeated push is a no-op on
//! the server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::Document;

/// Record as exchanged with the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Remote collection name (e.g. `body_metrics`)
    pub entity_type: String,
    /// Client-generated, globally unique id
    pub id: String,
    /// Owning account
    pub owner_id: String,
    /// Modification time as known to the side that produced this record
    pub last_modified: DateTime<Utc>,
    /// Tombstone marker
    pub is_deleted: bool,
    /// Domain fields, serialized as a JSON object
    pub payload: Document,
}

/// Acknowledgement of an accepted push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushAck {
    /// Modification time recorded by the server
    pub server_last_modified: DateTime<Utc>,
    /// `true` when the server confirms the record is deleted remotely
    pub deleted: bool,
}

/// Errors reported by a [`RemoteGateway`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Connection refused, DNS failure, offline.
    #[error("Network error: {0}")]
    Network(String),

    /// The call did not complete in time.
    #[error("Request timed out")]
    Timeout,

    /// Server-side failure (5xx); the payload itself was fine.
    #[error("Server error: {0}")]
    Server(String),

    /// Session expired; refreshed outside the core.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The remote rejected the payload as invalid.
    #[error("Validation error: {0}")]
    Validation(String),
}

impl GatewayError {
    /// Whether retrying the same payload later can succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, GatewayError::Validation(_))
    }
}

/// Remote gateway trait
///
/// # Example
///
/// ```ignore
/// use bridge_traits::remote::{RemoteGateway, RemoteRecord};
///
/// async fn upload(gateway: &dyn RemoteGateway, record: &RemoteRecord) -> bool {
///     gateway.push(record).await.is_ok()
/// }
/// ```
#[async_trait::async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Upsert (or delete, for a tombstone) one record, keyed by `record.id`.
    async fn push(&self, record: &RemoteRecord) -> Result<PushAck, GatewayError>;

    /// Fetch the records of one collection owned by `owner_id` that changed
    /// at or after `since` (everything when `since` is `None`). Remote
    /// deletions are reported as records with `is_deleted = true`.
    async fn pull(
        &self,
        entity_type: &str,
        owner_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RemoteRecord>, GatewayError>;
}
