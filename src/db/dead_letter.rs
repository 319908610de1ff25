//! Dead-letter spill file for batches that could not be committed
//!
//! Each spilled event becomes one JSON line carrying the failure reason and
//! the time of the failure, so the file can be replayed later with any JSON
//! tooling. The file is append-only and fsynced after every batch. A batch
//! that fails part-way is cut back off the end so the file only ever holds
//! whole lines.

use crate::event::Event;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::error;

/// One line of the dead-letter file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub failed_at: DateTime<Utc>,
    pub error: String,
    pub event: Event,
}

/// Append-only JSON-lines file of undeliverable events
pub struct DeadLetterFile {
    path: PathBuf,
    file: Mutex<File>,
}

impl DeadLetterFile {
    /// Open (or create) the spill file for appending
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    /// Path of the spill file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append every event of a failed batch; returns the number written
    ///
    /// On error nothing of this batch remains in the file.
    pub fn spill(&self, batch: &[Event], reason: &str) -> io::Result<usize> {
        let failed_at = Utc::now();
        let mut buf = Vec::with_capacity(batch.len() * 160);

        for event in batch {
            let record = DeadLetterRecord {
                failed_at,
                error: reason.to_string(),
                event: event.clone(),
            };
            serde_json::to_writer(&mut buf, &record)?;
            buf.push(b'\n');
        }

        let mut file = self.file.lock();
        append_whole(&mut file, &buf)?;

        Ok(batch.len())
    }
}

/// Append and sync `buf`, truncating back to the previous end on failure
fn append_whole(file: &mut File, buf: &[u8]) -> io::Result<()> {
    let start = file.metadata()?.len();

    let written = file.write_all(buf).and_then(|()| file.sync_data());
    if let Err(e) = written {
        if let Err(rollback) = file.set_len(start) {
            error!(error = %rollback, "Failed to roll back partial dead-letter write");
        }
        return Err(e);
    }

    Ok(())
}

/// Read back a dead-letter file (for replay tooling and tests)
pub fn read_dead_letters(path: &Path) -> io::Result<Vec<DeadLetterRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use tempfile::tempdir;

    #[test]
    fn test_spill_and_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spill").join("dead.jsonl");

        let dead = DeadLetterFile::open(&path).unwrap();
        let batch = vec![
            Event::new(EventType::PageView, Utc::now()).with_product("a"),
            Event::new(EventType::Purchase, Utc::now()).with_amount(3.5),
        ];

        assert_eq!(dead.spill(&batch, "disk I/O error").unwrap(), 2);
        assert_eq!(dead.spill(&batch[..1], "database is locked").unwrap(), 1);

        let records = read_dead_letters(&path).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].event, batch[0]);
        assert_eq!(records[1].event.order_amount, Some(3.5));
        assert_eq!(records[2].error, "database is locked");
    }

    #[test]
    fn test_failed_spill_leaves_file_readable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dead.jsonl");
        let batch = vec![Event::new(EventType::Purchase, Utc::now()).with_amount(9.0)];

        let dead = DeadLetterFile::open(&path).unwrap();
        dead.spill(&batch, "first").unwrap();
        let len_before = std::fs::metadata(&path).unwrap().len();

        // A handle that cannot be written makes the next spill fail
        let broken = DeadLetterFile {
            path: path.clone(),
            file: Mutex::new(File::open(&path).unwrap()),
        };
        assert!(broken.spill(&batch, "lost").is_err());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), len_before);

        dead.spill(&batch, "third").unwrap();
        let records = read_dead_letters(&path).unwrap();
        let reasons: Vec<&str> = records.iter().map(|r| r.error.as_str()).collect();
        assert_eq!(reasons, vec!["first", "third"]);
    }

    #[test]
    fn test_reopen_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dead.jsonl");
        let batch = vec![Event::new(EventType::AddToCart, Utc::now())];

        DeadLetterFile::open(&path).unwrap().spill(&batch, "first").unwrap();
        DeadLetterFile::open(&path).unwrap().spill(&batch, "second").unwrap();

        let records = read_dead_letters(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].error, "second");
    }
}
