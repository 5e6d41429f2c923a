use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The write never reached storage; the caller must tell the user.
    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Local store is not initialized")]
    NotInitialized,

    #[error("Local store is closed")]
    Closed,

    #[error("Storage backend error: {0}")]
    Backend(BridgeError),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<BridgeError> for StoreError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::QuotaExceeded(msg) => StoreError::QuotaExceeded(msg),
            other => StoreError::Backend(other),
        }
    }
}

impl StoreError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, StoreError::QuotaExceeded(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_is_lifted_out_of_backend_errors() {
        let err: StoreError = BridgeError::QuotaExceeded("disk full".into()).into();
        assert!(err.is_quota_exceeded());

        let err: StoreError = BridgeError::DatabaseError("locked".into()).into();
        assert!(matches!(err, StoreError::Backend(_)));
    }
}
