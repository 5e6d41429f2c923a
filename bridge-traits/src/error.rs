use thiserror::Error;

/// Failure reported by a host-provided capability.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The host did not wire this capability up
    #[error("{0} is not available on this host")]
    NotAvailable(String),

    #[error("Host operation failed: {0}")]
    OperationFailed(String),

    #[error("Storage backend error: {0}")]
    DatabaseError(String),

    /// Local storage is full; the write did not happen.
    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// A unique index already holds this key
    #[error("Unique constraint violated: {0}")]
    ConstraintViolation(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
