//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by the cache and sync crates:
//! - Logging and tracing infrastructure
//! - Configuration of host capabilities (`CoreConfig`)
//! - Event bus for sync and cache events
//!
//! ## Overview
//!
//! Other core crates depend on this one for their logging conventions and
//! for broadcasting state changes to the host.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
