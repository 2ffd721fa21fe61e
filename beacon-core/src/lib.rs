//! # beacon-core
//!
//! Core library for beacon - a durable, batching event tracker.
//!
//! This library provides:
//! - Domain types for events and batches
//! - A SQLite-backed pending event queue with prefix truncation
//! - A serial flush worker and HTTP delivery
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Events move through three stages:
//! - **Collected:** built in memory with a timestamp and identifier
//! - **Pending:** persisted in SQLite, ordered by cursor
//! - **Delivered:** sent in a batch, then truncated from the store
//!
//! ## Example
//!
//! ```rust,no_run
//! use beacon_core::{Config, EventStore};
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Inspect the pending queue
//! let store = EventStore::open(&config.collector.resolved_database_path(), "app-key")
//!     .expect("failed to open database");
//! println!("{} events pending", store.count().expect("failed to count"));
//! ```

// Re-export commonly used items at the crate root
pub use collector::{Collector, CollectorBuilder, DeliveryOutcome, FlushStats, Transport};
pub use config::Config;
pub use db::{Database, EventStore};
pub use error::{Error, Result, ValidationError};
pub use types::*;

// Public modules
pub mod collector;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod types;
