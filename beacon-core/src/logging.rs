//! Logging infrastructure for beacon
//!
//! Logs are written to `~/.local/state/beacon/beacon.log.<date>` following XDG
//! standards. The flush worker logs from its own thread, so the file writer
//! is non-blocking.

use crate::config::LoggingConfig;
use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Prefix of the daily log files
pub const LOG_FILE_NAME: &str = "beacon.log";

/// Initialize the logging system
///
/// Sets up tracing with:
/// - Daily rolling file output in the configured log directory
/// - Optional stderr echo of warnings and errors
/// - Level from `RUST_LOG`, falling back to the configured level
pub fn init(config: &LoggingConfig) -> crate::error::Result<LoggingGuard> {
    let log_dir = config.resolved_directory();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_NAME);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true)
        .with_line_number(true);

    let stderr_layer = config.stderr.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .without_time()
            .with_filter(LevelFilter::WARN)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| crate::error::Error::Config(format!("logging already initialized: {}", e)))?;

    tracing::info!(
        log_dir = %log_dir.display(),
        level = %config.level,
        stderr = config.stderr,
        "Logging initialized"
    );

    Ok(LoggingGuard { _writer: guard })
}

/// Initialize logging for tests (captured per test)
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_thread_names(true)
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Flushes buffered log lines when dropped; hold it until exit.
pub struct LoggingGuard {
    _writer: tracing_appender::non_blocking::WorkerGuard,
}

/// Path prefix of the log files for `config`; the date is appended on rotation
pub fn log_file_path(config: &LoggingConfig) -> PathBuf {
    config.resolved_directory().join(LOG_FILE_NAME)
}
