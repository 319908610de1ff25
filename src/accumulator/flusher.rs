//! Flush guard around the committer
//!
//! A failed commit is retried with exponential backoff while the error looks
//! transient. When retries run out the batch goes to the dead-letter file if
//! one is configured; otherwise it is dropped and the loss is logged with
//! its size and counted, never discarded silently.

use crate::accumulator::batch::FlushTrigger;
use crate::db::{Committer, DeadLetterFile};
use crate::error::PersistenceError;
use crate::event::Event;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Default number of retries after the first failed commit
pub const DEFAULT_COMMIT_RETRIES: u32 = 3;

/// Retry schedule for failed commits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = no retry)
    pub max_retries: u32,

    /// Delay before the first retry
    pub base_backoff: Duration,

    /// Upper bound for any single delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_COMMIT_RETRIES,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based), doubling each time
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }
}

/// Counters shared between the accumulator thread and observers
#[derive(Debug, Default)]
pub struct FlushStats {
    /// Events taken from the source
    pub events_received: AtomicU64,

    /// Batches handed to the committer
    pub batches_flushed: AtomicU64,

    /// Events durably committed
    pub events_committed: AtomicU64,

    /// Commit retries performed
    pub commit_retries: AtomicU64,

    /// Batches that could not be committed
    pub batches_failed: AtomicU64,

    /// Events written to the dead-letter file
    pub events_dead_lettered: AtomicU64,

    /// Events lost for good
    pub events_dropped: AtomicU64,
}

impl FlushStats {
    /// Events durably committed
    pub fn events_committed(&self) -> u64 {
        self.events_committed.load(Ordering::Relaxed)
    }

    /// Batches handed to the committer
    pub fn batches_flushed(&self) -> u64 {
        self.batches_flushed.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> AccumulatorSummary {
        AccumulatorSummary {
            events_received: self.events_received.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            events_committed: self.events_committed.load(Ordering::Relaxed),
            commit_retries: self.commit_retries.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            events_dead_lettered: self.events_dead_lettered.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`FlushStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccumulatorSummary {
    pub events_received: u64,
    pub batches_flushed: u64,
    pub events_committed: u64,
    pub commit_retries: u64,
    pub batches_failed: u64,
    pub events_dead_lettered: u64,
    pub events_dropped: u64,
}

/// Result of flushing one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// All events committed
    Committed(usize),
    /// Commit failed; events spilled to the dead-letter file
    DeadLettered(usize),
    /// Commit failed and no spill was possible
    Dropped(usize),
}

/// Commits flushed batches with retry and dead-letter fallback
pub struct Flusher {
    committer: Arc<dyn Committer>,
    retry: RetryPolicy,
    dead_letter: Option<DeadLetterFile>,
    stats: Arc<FlushStats>,
}

impl Flusher {
    /// Create a flusher around a committer
    pub fn new(committer: Arc<dyn Committer>, retry: RetryPolicy) -> Self {
        Self {
            committer,
            retry,
            dead_letter: None,
            stats: Arc::new(FlushStats::default()),
        }
    }

    /// Spill exhausted batches to this file instead of dropping them
    pub fn with_dead_letter(mut self, dead_letter: DeadLetterFile) -> Self {
        self.dead_letter = Some(dead_letter);
        self
    }

    /// Shared counters
    pub fn stats(&self) -> Arc<FlushStats> {
        Arc::clone(&self.stats)
    }

    /// Commit one batch, taking ownership of it
    pub fn flush(&self, batch: Vec<Event>, trigger: FlushTrigger) -> FlushOutcome {
        let count = batch.len();
        if count == 0 {
            return FlushOutcome::Committed(0);
        }

        self.stats.batches_flushed.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        match self.commit_with_retry(&batch) {
            Ok(written) => {
                self.stats.events_committed.fetch_add(written as u64, Ordering::Relaxed);
                info!(
                    events = written,
                    trigger = %trigger,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Flushed batch to database"
                );
                FlushOutcome::Committed(written)
            }
            Err(err) => {
                self.stats.batches_failed.fetch_add(1, Ordering::Relaxed);
                self.spill(&batch, &err)
            }
        }
    }

    fn commit_with_retry(&self, batch: &[Event]) -> Result<usize, PersistenceError> {
        let mut retry = 0;

        loop {
            match self.committer.commit(batch) {
                Ok(written) => return Ok(written),
                Err(err) if err.is_transient() && retry < self.retry.max_retries => {
                    retry += 1;
                    let delay = self.retry.backoff(retry);
                    self.stats.commit_retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        error = %err,
                        retry,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Batch commit failed, retrying"
                    );
                    thread::sleep(delay);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn spill(&self, batch: &[Event], err: &PersistenceError) -> FlushOutcome {
        let count = batch.len();

        if let Some(dead_letter) = &self.dead_letter {
            match dead_letter.spill(batch, &err.to_string()) {
                Ok(spilled) => {
                    self.stats
                        .events_dead_lettered
                        .fetch_add(spilled as u64, Ordering::Relaxed);
                    warn!(
                        error = %err,
                        events = spilled,
                        path = %dead_letter.path().display(),
                        "Batch commit failed; events written to dead-letter file"
                    );
                    return FlushOutcome::DeadLettered(spilled);
                }
                Err(io_err) => {
                    error!(
                        error = %io_err,
                        path = %dead_letter.path().display(),
                        "Failed to write dead-letter file"
                    );
                }
            }
        }

        self.stats.events_dropped.fetch_add(count as u64, Ordering::Relaxed);
        error!(error = %err, events = count, "Batch commit failed; events discarded");
        debug!(first = ?batch.first(), "First discarded event");
        FlushOutcome::Dropped(count)
    }
}
