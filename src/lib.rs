//! Workspace façade crate.
//!
//! Re-exports the member crates so host applications can depend on
//! `logbody-core` alone. The `sqlite` feature (default) wires the
//! sqlx-backed storage adapter into the service bootstrap; `memory-only`
//! keeps everything in process, which suits previews and tests.

#[cfg(any(feature = "sqlite", feature = "memory-only"))]
pub use core_service::*;

#[cfg(any(feature = "sqlite", feature = "memory-only"))]
pub use core_store as store;

#[cfg(any(feature = "sqlite", feature = "memory-only"))]
pub use core_sync as sync;
