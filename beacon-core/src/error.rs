//! Error types for beacon-core

use thiserror::Error;

/// Main error type for the beacon-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport setup error (delivery outcomes are not errors)
    #[error("transport error: {0}")]
    Transport(String),

    /// Flush worker could not be started or has gone away
    #[error("scheduler error: {0}")]
    Scheduler(String),
}

/// Result type alias for beacon-core
pub type Result<T> = std::result::Result<T, Error>;

/// Reasons an event record could not be built.
///
/// These never leave the collector: a tracking call that hits one simply
/// drops the event.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// External properties failed to serialize
    #[error("external properties are not serializable: {0}")]
    Properties(#[source] serde_json::Error),

    /// External properties serialized to something other than a JSON object
    #[error("external properties must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}
