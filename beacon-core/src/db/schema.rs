//! Database schema
//!
//! The schema version lives in `PRAGMA user_version`. Pending events are
//! disposable, so there is no migration path: whenever the stored version
//! differs from [`SCHEMA_VERSION`], every table is dropped and recreated.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

const DROP_TABLES: &str = r#"
    DROP INDEX IF EXISTS idx_events_app_cursor;
    DROP TABLE IF EXISTS events;
    DROP TABLE IF EXISTS metadata;
"#;

const CREATE_TABLES: &str = r#"
    -- Pending events, one row per collected event.
    -- `cursor` is the ordering and truncation key; AUTOINCREMENT keeps it
    -- strictly increasing even after the newest rows are removed.
    CREATE TABLE IF NOT EXISTS events (
        cursor           INTEGER PRIMARY KEY AUTOINCREMENT,
        app_key          TEXT NOT NULL,
        data             TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_events_app_cursor ON events(app_key, cursor);

    -- Process-independent values such as the generated device identifier.
    CREATE TABLE IF NOT EXISTS metadata (
        key              TEXT PRIMARY KEY,
        value            TEXT NOT NULL
    );
"#;

/// Bring the schema to [`SCHEMA_VERSION`], recreating it on any mismatch
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version = get_schema_version(conn)?;

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database schema"
    );

    if current_version == SCHEMA_VERSION {
        // Tables may have been dropped out from under us; recreate silently.
        conn.execute_batch(CREATE_TABLES)?;
        return Ok(());
    }

    if current_version != 0 {
        tracing::warn!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Schema version changed, discarding pending events"
        );
    }

    conn.execute_batch(&format!("BEGIN; {} {} COMMIT;", DROP_TABLES, CREATE_TABLES))?;
    conn.execute(&format!("PRAGMA user_version = {}", SCHEMA_VERSION), [])?;

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, table: &str) -> bool {
        let exists: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                [table],
                |r| r.get(0),
            )
            .unwrap();
        exists == 1
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO events (app_key, data) VALUES ('app', '{}')",
            [],
        )
        .unwrap();
        run_migrations(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1, "same version must keep pending events");
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        for table in ["events", "metadata"] {
            assert!(table_exists(&conn, table), "Table {} should exist", table);
        }
    }

    #[test]
    fn test_version_change_recreates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO events (app_key, data) VALUES ('app', '{}')",
            [],
        )
        .unwrap();

        // Pretend the file was written by an older build.
        conn.execute(&format!("PRAGMA user_version = {}", SCHEMA_VERSION - 1), [])
            .unwrap();
        run_migrations(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_legacy_table_layout_is_replaced() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE events (id INTEGER PRIMARY KEY, payload TEXT); PRAGMA user_version = 1;",
        )
        .unwrap();

        run_migrations(&conn).unwrap();

        // The new layout has an app_key column.
        conn.execute(
            "INSERT INTO events (app_key, data) VALUES ('app', '{}')",
            [],
        )
        .unwrap();
    }
}
