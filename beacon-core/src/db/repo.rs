//! Database handle
//!
//! Owns the SQLite connection shared by every [`EventStore`](super::EventStore)
//! scope, plus the small key/value metadata table.

use crate::error::Result;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Metadata key holding the generated device identifier
const DEVICE_UDID_KEY: &str = "device_udid";

/// Database handle with a single mutex-guarded connection
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL lets diagnostic readers in other processes (the CLI) look at
        // the queue while the flush worker writes.
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Bring the schema up to date
    pub fn migrate(&self) -> Result<()> {
        let conn = self.connection();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave the connection in a
        // half-written state; SQLite rolls back the open statement.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ============================================
    // Metadata operations
    // ============================================

    /// Stable identifier for this installation, generated on first use
    pub fn device_udid(&self) -> Result<String> {
        let conn = self.connection();
        let candidate = uuid::Uuid::new_v4().simple().to_string();
        // INSERT OR IGNORE keeps the first identifier if two handles race.
        conn.execute(
            "INSERT OR IGNORE INTO metadata (key, value) VALUES (?1, ?2)",
            params![DEVICE_UDID_KEY, candidate],
        )?;
        let udid: String = conn.query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            params![DEVICE_UDID_KEY],
            |row| row.get(0),
        )?;
        Ok(udid)
    }
}
