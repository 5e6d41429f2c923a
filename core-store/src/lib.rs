//! # Local Store Module
//!
//! Owns the persistent client-side cache for body metrics, daily metrics and
//! the account profile.
//!
//! ## Overview
//!
//! This module manages:
//! - Domain models and the `Cached<T>` wrapper carrying sync bookkeeping
//! - The persisted schema (stores + secondary indices)
//! - [`LocalStore`]: stamped writes, tombstone-filtered reads, bulk operations
//! - Storage backends: SQLite via `sqlx` (feature `sqlite`) and in-memory
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_store::{LocalStore, SCHEMA_VERSION};
//! use core_store::adapters::SqliteBackend;
//! use core_store::db::DatabaseConfig;
//!
//! let backend = SqliteBackend::new(DatabaseConfig::new("logbody.db")).await?;
//! let store = LocalStore::new(Arc::new(backend), Arc::new(SystemClock));
//! store.initialize(SCHEMA_VERSION).await?;
//!
//! store.put(BodyMetric::new(id, "u1", today).with_weight(80.0, WeightUnit::Kg)).await?;
//! ```

pub mod adapters;
#[cfg(feature = "sqlite")]
pub mod db;
pub mod error;
pub mod models;
pub mod schema;
pub mod store;

pub use error::{Result, StoreError};
pub use models::{
    new_record_id, BodyMetric, Cached, DailyMetric, DateRange, DatedEntity, Entity, EntityKind,
    HeightUnit, Profile, SyncStatus, WeightUnit,
};
pub use schema::SCHEMA_VERSION;
pub use store::{LocalStore, UnsyncedItems};
