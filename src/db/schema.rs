//! Database schema definitions and creation
//!
//! This module defines the SQLite schema for persisted events and
//! provides functions to create and configure the database.

use crate::error::DbResult;
use rusqlite::Connection;
use std::time::Duration;

/// Current schema version
pub const SCHEMA_VERSION: u32 = 1;

/// SQL to create the events table
///
/// `id` uses AUTOINCREMENT so identifiers are never reused, keeping the
/// table strictly append-only from a reader's point of view.
const CREATE_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_type TEXT NOT NULL,
    timestamp DATETIME NOT NULL,      -- RFC 3339, UTC
    product_id TEXT,
    order_amount REAL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
)
"#;

/// SQL to create service metadata table
const CREATE_SINK_INFO_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS sink_info (
    key TEXT PRIMARY KEY,
    value TEXT
)
"#;

/// Indexes every deployment gets
const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_event_type ON events(event_type)",
    "CREATE INDEX IF NOT EXISTS idx_product_id ON events(product_id)",
];

/// Extra index used by the broker consumer deployment
const CREATE_TIMESTAMP_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_timestamp ON events(timestamp)";

/// SQLite pragmas for a long-running writer with concurrent readers
///
/// WAL lets the analytics endpoint read while a batch commits;
/// synchronous=NORMAL is durable across process crashes in WAL mode.
const WRITE_PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -16000;      -- 16MB cache
PRAGMA temp_store = MEMORY;
PRAGMA foreign_keys = ON;
"#;

/// How long a connection waits on a locked database before giving up
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Which optional indexes to create
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchemaOptions {
    /// Also index `timestamp` (broker consumer deployment)
    pub timestamp_index: bool,
}

/// Create and configure the database for writing
pub fn create_database(conn: &Connection, options: SchemaOptions) -> DbResult<()> {
    conn.execute_batch(WRITE_PRAGMAS)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;

    conn.execute(CREATE_EVENTS_TABLE, [])?;
    conn.execute(CREATE_SINK_INFO_TABLE, [])?;

    create_indexes(conn, options)?;

    Ok(())
}

/// Create secondary indexes
pub fn create_indexes(conn: &Connection, options: SchemaOptions) -> DbResult<()> {
    for sql in CREATE_INDEXES {
        conn.execute(sql, [])?;
    }
    if options.timestamp_index {
        conn.execute(CREATE_TIMESTAMP_INDEX, [])?;
    }
    Ok(())
}

/// Store service metadata
pub fn set_sink_info(conn: &Connection, key: &str, value: &str) -> DbResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO sink_info (key, value) VALUES (?1, ?2)",
        [key, value],
    )?;
    Ok(())
}

/// Get service metadata
pub fn get_sink_info(conn: &Connection, key: &str) -> DbResult<Option<String>> {
    let result = conn.query_row(
        "SELECT value FROM sink_info WHERE key = ?1",
        [key],
        |row| row.get(0),
    );

    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Metadata keys
pub mod keys {
    /// Schema version
    pub const SCHEMA_VERSION: &str = "schema_version";

    /// Version of the binary that last opened the database
    pub const SINK_VERSION: &str = "sink_version";

    /// When the writer last started (RFC 3339)
    pub const LAST_STARTED: &str = "last_started";
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn index_names(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_create_database() {
        let conn = Connection::open_in_memory().unwrap();
        create_database(&conn, SchemaOptions::default()).unwrap();

        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='events'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);

        let indexes = index_names(&conn);
        assert!(indexes.contains(&"idx_event_type".to_string()));
        assert!(indexes.contains(&"idx_product_id".to_string()));
        assert!(!indexes.contains(&"idx_timestamp".to_string()));
    }

    #[test]
    fn test_timestamp_index_option() {
        let conn = Connection::open_in_memory().unwrap();
        create_database(&conn, SchemaOptions { timestamp_index: true }).unwrap();

        assert!(index_names(&conn).contains(&"idx_timestamp".to_string()));
    }

    #[test]
    fn test_create_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_database(&conn, SchemaOptions::default()).unwrap();
        create_database(&conn, SchemaOptions::default()).unwrap();
    }

    #[test]
    fn test_created_at_defaults() {
        let conn = Connection::open_in_memory().unwrap();
        create_database(&conn, SchemaOptions::default()).unwrap();

        conn.execute(
            "INSERT INTO events (event_type, timestamp) VALUES ('page_view', '2025-10-02T10:30:00Z')",
            [],
        )
        .unwrap();

        let created_at: Option<String> = conn
            .query_row("SELECT created_at FROM events", [], |row| row.get(0))
            .unwrap();
        assert!(created_at.is_some());
    }

    #[test]
    fn test_sink_info() {
        let conn = Connection::open_in_memory().unwrap();
        create_database(&conn, SchemaOptions::default()).unwrap();

        set_sink_info(&conn, keys::SCHEMA_VERSION, "1").unwrap();
        assert_eq!(get_sink_info(&conn, keys::SCHEMA_VERSION).unwrap(), Some("1".to_string()));
        assert_eq!(get_sink_info(&conn, "nonexistent").unwrap(), None);
    }
}
