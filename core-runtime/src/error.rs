use thiserror::Error;

/// Startup failures of the runtime layer.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad settings, or logging installed twice
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A capability the host must inject is absent
    #[error("Missing {capability}: {message}")]
    CapabilityMissing { capability: String, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;
