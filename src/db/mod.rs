//! Storage for persisted events
//!
//! SQLite holds the `events` table. A single writer (the accumulator's
//! committer) appends batches inside transactions; readers open their own
//! connections and rely on WAL for isolation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              Batch Accumulator thread                   │
//! │  - owns the in-flight batch                             │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ &[Event]
//!                       ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │   SqliteCommitter (one transaction per batch)           │
//! │   DeadLetterFile  (spill when commits keep failing)     │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │         SQLite file (WAL)  ◀── analytics readers        │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod analytics;
pub mod committer;
pub mod dead_letter;
pub mod schema;

pub use analytics::{summarize, AnalyticsSummary, EventRecord, PurchaseStats};
pub use committer::{Committer, SqliteCommitter};
pub use dead_letter::{read_dead_letters, DeadLetterFile, DeadLetterRecord};
pub use schema::{create_database, create_indexes, keys, SchemaOptions};

use crate::error::{DbError, DbResult};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;

/// Open (creating if needed) the database for writing and apply the schema
pub fn open_database(path: &Path, options: SchemaOptions) -> DbResult<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| DbError::CreateFailed {
                path: path.to_path_buf(),
                reason: format!("Failed to create parent directory: {}", e),
            })?;
        }
    }

    let conn = Connection::open(path)?;
    schema::create_database(&conn, options)?;

    schema::set_sink_info(&conn, keys::SCHEMA_VERSION, &schema::SCHEMA_VERSION.to_string())?;
    schema::set_sink_info(&conn, keys::SINK_VERSION, env!("CARGO_PKG_VERSION"))?;
    schema::set_sink_info(&conn, keys::LAST_STARTED, &chrono::Utc::now().to_rfc3339())?;

    Ok(conn)
}

/// Open an existing database for reading only
pub fn open_read_only(path: &Path) -> DbResult<Connection> {
    if !path.exists() {
        return Err(DbError::CreateFailed {
            path: path.to_path_buf(),
            reason: "Database does not exist".to_string(),
        });
    }

    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(schema::BUSY_TIMEOUT)?;

    Ok(conn)
}
