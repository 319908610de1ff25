//! Transactional batch committer
//!
//! One flushed batch becomes one SQLite transaction. Either every event of
//! the batch is inserted and the transaction commits, or the first failing
//! row aborts the transaction and nothing of the batch is visible.
//!
//! The connection sits behind a mutex. The accumulator only ever commits
//! from its own thread, but the guard keeps commits serialized if another
//! path (tests, a drain on shutdown) calls in concurrently.

use crate::error::{PersistenceError, PersistenceResult};
use crate::event::Event;
use chrono::SecondsFormat;
use parking_lot::Mutex;
use rusqlite::{params, Connection};

const INSERT_EVENT: &str =
    "INSERT INTO events (event_type, timestamp, product_id, order_amount) VALUES (?1, ?2, ?3, ?4)";

/// Something that can durably persist a batch of events atomically
pub trait Committer: Send + Sync {
    /// Persist all events or none; returns the number of rows written
    fn commit(&self, batch: &[Event]) -> PersistenceResult<usize>;
}

/// Committer writing to the `events` table of a SQLite database
pub struct SqliteCommitter {
    conn: Mutex<Connection>,
}

impl SqliteCommitter {
    /// Wrap an already-initialized connection (see [`crate::db::open_database`])
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Run a closure against the underlying connection
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> T) -> T {
        let conn = self.conn.lock();
        f(&conn)
    }
}

impl Committer for SqliteCommitter {
    fn commit(&self, batch: &[Event]) -> PersistenceResult<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock();

        // Dropping `tx` without commit rolls back
        let tx = conn.transaction().map_err(PersistenceError::Begin)?;

        {
            let mut stmt = tx.prepare_cached(INSERT_EVENT).map_err(PersistenceError::Prepare)?;

            for (index, event) in batch.iter().enumerate() {
                stmt.execute(params![
                    event.event_type.as_str(),
                    event.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
                    event.product_id,
                    event.order_amount,
                ])
                .map_err(|source| PersistenceError::Insert { index, source })?;
            }
        }

        tx.commit().map_err(PersistenceError::Commit)?;

        Ok(batch.len())
    }
}
