//! Database layer for beacon
//!
//! This module provides the storage layer using SQLite with:
//! - Version-checked schema (recreated on mismatch)
//! - A shared [`Database`] handle
//! - App-key scoped [`EventStore`] views with prefix truncation by cursor

pub mod repo;
pub mod schema;
pub mod store;

pub use repo::Database;
pub use store::EventStore;
