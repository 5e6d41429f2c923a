//! # Host Bridge Traits
//!
//! Capability traits the cache and sync core requires from its host.
//!
//! ## Overview
//!
//! This crate defines the contract between the local-first core and the
//! platform it runs on. Each trait is a capability that must be implemented
//! differently per platform (desktop, mobile, web) or per backend service.
//!
//! ## Traits
//!
//! ### Persistence
//! - [`StorageBackend`](storage::StorageBackend) - Key/value document storage with
//!   secondary indices (SQLite on native, IndexedDB-like stores elsewhere)
//!
//! ### Remote
//! - [`RemoteGateway`](remote::RemoteGateway) - Authoritative remote store (push/pull)
//! - [`NetworkMonitor`](network::NetworkMonitor) - Connectivity detection and change stream
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! Storage and platform bridges report [`BridgeError`](error::BridgeError).
//! The remote gateway reports [`GatewayError`](remote::GatewayError), whose
//! variants carry the retry classification the reconciler relies on.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so a single handle can be shared
//! between UI-facing code and background sync tasks.

pub mod error;
pub mod network;
pub mod remote;
pub mod storage;
pub mod time;

pub use error::{BridgeError, Result};

// Re-export commonly used types
pub use network::{NetworkChangeStream, NetworkInfo, NetworkMonitor, NetworkStatus};
pub use remote::{GatewayError, PushAck, RemoteGateway, RemoteRecord};
pub use storage::{Document, IndexQuery, IndexSpec, KeyRange, StorageBackend, StorageSchema, StoreSpec};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
