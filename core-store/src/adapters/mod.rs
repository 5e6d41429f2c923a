//! Storage backend implementations
//!
//! Concrete implementations of the `StorageBackend` trait for the targets the
//! cache runs on.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite_native;

pub use memory::MemoryBackend;
#[cfg(feature = "sqlite")]
pub use sqlite_native::SqliteBackend;
