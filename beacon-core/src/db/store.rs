//! App-scoped pending event log
//!
//! Every operation is a single statement under the database mutex, so each
//! one is safe to call from any thread. Sequences of operations (peek, then
//! remove) are not transactional; the flush worker is the only caller that
//! mutates, which is what keeps them consistent.

use std::path::Path;
use std::sync::Arc;

use rusqlite::params;

use super::Database;
use crate::error::Result;
use crate::types::{Batch, Cursor, Event};

/// Durable FIFO of events for exactly one app key
#[derive(Clone)]
pub struct EventStore {
    db: Arc<Database>,
    app_key: String,
}

impl EventStore {
    /// Scope an already-migrated database to `app_key`
    pub fn new(db: Arc<Database>, app_key: impl Into<String>) -> Self {
        Self {
            db,
            app_key: app_key.into(),
        }
    }

    /// Open (creating if needed) the database at `path` and scope it
    pub fn open(path: &Path, app_key: impl Into<String>) -> Result<Self> {
        let db = Database::open(path)?;
        db.migrate()?;
        Ok(Self::new(Arc::new(db), app_key))
    }

    /// In-memory store (for testing)
    pub fn open_in_memory(app_key: impl Into<String>) -> Result<Self> {
        let db = Database::open_in_memory()?;
        db.migrate()?;
        Ok(Self::new(Arc::new(db), app_key))
    }

    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    /// Shared database handle
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Persist one event, returning its cursor
    pub fn append(&self, event: &Event) -> Result<Cursor> {
        // Encode before touching the database so a bad record never
        // produces a row.
        let data = serde_json::to_string(event)?;

        let conn = self.db.connection();
        conn.execute(
            "INSERT INTO events (app_key, data) VALUES (?1, ?2)",
            params![self.app_key, data],
        )?;
        Ok(Cursor(conn.last_insert_rowid()))
    }

    /// Number of pending events in this scope
    pub fn count(&self) -> Result<usize> {
        let conn = self.db.connection();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE app_key = ?1",
            params![self.app_key],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Read up to `limit` of the oldest pending events.
    ///
    /// Returns `None` when nothing is pending or `limit` is zero. A stored
    /// record that no longer decodes is logged and left out of `events`,
    /// but stays covered by the batch cursor so the next removal clears it.
    pub fn peek(&self, limit: usize) -> Result<Option<Batch>> {
        if limit == 0 {
            return Ok(None);
        }

        let conn = self.db.connection();
        let mut stmt = conn.prepare(
            "SELECT cursor, data FROM events WHERE app_key = ?1 ORDER BY cursor ASC LIMIT ?2",
        )?;

        let rows = stmt
            .query_map(params![self.app_key, limit as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let Some(&(last_cursor, _)) = rows.last() else {
            return Ok(None);
        };

        let records = rows.len();
        let mut events = Vec::with_capacity(records);
        for (cursor, data) in rows {
            match serde_json::from_str::<Event>(&data) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(
                        app_key = %self.app_key,
                        cursor,
                        error = %e,
                        "Skipping undecodable stored event"
                    );
                }
            }
        }

        Ok(Some(Batch {
            events,
            cursor: Cursor(last_cursor),
            records,
        }))
    }

    /// Delete every event in this scope at or before `cursor`.
    ///
    /// Returns the number of rows removed; repeating a call is a no-op.
    pub fn remove_up_to(&self, cursor: Cursor) -> Result<usize> {
        let conn = self.db.connection();
        let removed = conn.execute(
            "DELETE FROM events WHERE app_key = ?1 AND cursor <= ?2",
            params![self.app_key, cursor.0],
        )?;
        Ok(removed)
    }

    /// Delete every pending event in this scope
    pub fn purge(&self) -> Result<usize> {
        let conn = self.db.connection();
        let removed = conn.execute(
            "DELETE FROM events WHERE app_key = ?1",
            params![self.app_key],
        )?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventType;
    use proptest::prelude::*;

    fn event(name: &str) -> Event {
        Event::new::<serde_json::Value>(EventType::ViewedLink, Some(name), None, None).unwrap()
    }

    fn subjects(batch: &Batch) -> Vec<&str> {
        batch
            .events
            .iter()
            .map(|e| e.subject.as_deref().unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_append_and_peek() {
        let store = EventStore::open_in_memory("app").unwrap();

        store.append(&event("event 1")).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(subjects(&store.peek(10).unwrap().unwrap()), ["event 1"]);

        store.append(&event("event 2")).unwrap();
        store.append(&event("event 3")).unwrap();
        assert_eq!(store.count().unwrap(), 3);
        assert_eq!(
            subjects(&store.peek(10).unwrap().unwrap()),
            ["event 1", "event 2", "event 3"]
        );
    }

    #[test]
    fn test_cursors_strictly_increase() {
        let store = EventStore::open_in_memory("app").unwrap();
        let a = store.append(&event("a")).unwrap();
        let b = store.append(&event("b")).unwrap();
        assert!(b > a);

        // Removing the newest row must not let its cursor be reused.
        store.remove_up_to(b).unwrap();
        let c = store.append(&event("c")).unwrap();
        assert!(c > b);
    }

    #[test]
    fn test_peek_with_limit() {
        let store = EventStore::open_in_memory("app").unwrap();
        for name in ["event 1", "event 2", "event 3"] {
            store.append(&event(name)).unwrap();
        }

        assert!(store.peek(0).unwrap().is_none());
        assert_eq!(subjects(&store.peek(1).unwrap().unwrap()), ["event 1"]);
        assert_eq!(
            subjects(&store.peek(2).unwrap().unwrap()),
            ["event 1", "event 2"]
        );
        assert_eq!(store.peek(4).unwrap().unwrap().len(), 3);
    }

    #[test]
    fn test_peek_empty_store() {
        let store = EventStore::open_in_memory("app").unwrap();
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.peek(10).unwrap().is_none());
    }

    #[test]
    fn test_remove_with_limit() {
        let store = EventStore::open_in_memory("app").unwrap();
        for name in ["event 1", "event 2", "event 3"] {
            store.append(&event(name)).unwrap();
        }

        let batch = store.peek(2).unwrap().unwrap();
        assert_eq!(store.remove_up_to(batch.cursor).unwrap(), 2);
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(subjects(&store.peek(10).unwrap().unwrap()), ["event 3"]);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let store = EventStore::open_in_memory("app").unwrap();
        for name in ["a", "b", "c"] {
            store.append(&event(name)).unwrap();
        }
        let batch = store.peek(2).unwrap().unwrap();

        assert_eq!(store.remove_up_to(batch.cursor).unwrap(), 2);
        assert_eq!(store.remove_up_to(batch.cursor).unwrap(), 0);
        assert_eq!(store.remove_up_to(Cursor(0)).unwrap(), 0);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_remove_with_no_events() {
        let store = EventStore::open_in_memory("app").unwrap();
        assert_eq!(store.remove_up_to(Cursor(10)).unwrap(), 0);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_interleaved_add_and_remove() {
        let store = EventStore::open_in_memory("app").unwrap();
        for name in ["event 1", "event 2", "event 3"] {
            store.append(&event(name)).unwrap();
        }

        let batch = store.peek(1).unwrap().unwrap();
        store.remove_up_to(batch.cursor).unwrap();
        assert_eq!(
            subjects(&store.peek(10).unwrap().unwrap()),
            ["event 2", "event 3"]
        );

        store.append(&event("event 4")).unwrap();
        let batch = store.peek(1).unwrap().unwrap();
        store.remove_up_to(batch.cursor).unwrap();
        assert_eq!(
            subjects(&store.peek(10).unwrap().unwrap()),
            ["event 3", "event 4"]
        );

        store.append(&event("event 5")).unwrap();
        let batch = store.peek(2).unwrap().unwrap();
        store.remove_up_to(batch.cursor).unwrap();
        assert_eq!(subjects(&store.peek(10).unwrap().unwrap()), ["event 5"]);
    }

    #[test]
    fn test_scopes_are_isolated() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.migrate().unwrap();
        let first = EventStore::new(db.clone(), "first");
        let second = EventStore::new(db, "second");

        first.append(&event("a")).unwrap();
        let b = second.append(&event("b")).unwrap();
        first.append(&event("c")).unwrap();

        // A cursor from one scope never removes another scope's rows.
        assert_eq!(first.remove_up_to(b).unwrap(), 1);
        assert_eq!(first.count().unwrap(), 1);
        assert_eq!(second.count().unwrap(), 1);

        assert_eq!(second.purge().unwrap(), 1);
        assert_eq!(first.count().unwrap(), 1);
    }

    #[test]
    fn test_undecodable_record_is_skipped_but_covered() {
        let store = EventStore::open_in_memory("app").unwrap();
        store.append(&event("good 1")).unwrap();
        store
            .database()
            .connection()
            .execute(
                "INSERT INTO events (app_key, data) VALUES ('app', 'not json')",
                [],
            )
            .unwrap();
        store.append(&event("good 2")).unwrap();

        let batch = store.peek(10).unwrap().unwrap();
        assert_eq!(subjects(&batch), ["good 1", "good 2"]);
        assert_eq!(batch.records, 3);

        store.remove_up_to(batch.cursor).unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_storage_errors_surface() {
        let store = EventStore::open_in_memory("app").unwrap();
        store
            .database()
            .connection()
            .execute_batch("DROP TABLE events")
            .unwrap();

        assert!(store.count().is_err());
        assert!(store.append(&event("lost")).is_err());
        assert!(store.peek(10).is_err());
    }

    #[test]
    fn test_reopen_keeps_pending_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");

        {
            let store = EventStore::open(&path, "app").unwrap();
            store.append(&event("persisted")).unwrap();
        }

        let store = EventStore::open(&path, "app").unwrap();
        assert_eq!(subjects(&store.peek(10).unwrap().unwrap()), ["persisted"]);
    }

    proptest! {
        #[test]
        fn prop_prefix_truncation_preserves_fifo(
            total in 1usize..40,
            limits in proptest::collection::vec(1usize..10, 1..8),
        ) {
            let store = EventStore::open_in_memory("app").unwrap();
            for i in 0..total {
                store.append(&event(&i.to_string())).unwrap();
            }

            let mut next_expected = 0usize;
            for limit in limits {
                let Some(batch) = store.peek(limit).unwrap() else { break };
                prop_assert!(batch.len() <= limit);
                for (offset, e) in batch.events.iter().enumerate() {
                    let expected = (next_expected + offset).to_string();
                    prop_assert_eq!(e.subject.as_deref(), Some(expected.as_str()));
                }
                let removed = store.remove_up_to(batch.cursor).unwrap();
                prop_assert_eq!(removed, batch.len());
                next_expected += batch.len();
                prop_assert_eq!(store.count().unwrap(), total - next_expected);
            }
        }
    }
}
