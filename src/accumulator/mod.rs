//! Batch accumulator
//!
//! A single dedicated thread takes events from an [`EventSource`], groups
//! them into batches and hands every full or due batch to the [`Flusher`].
//!
//! # Flush triggers
//!
//! - **Size**: the batch reached `batch_size` events
//! - **Interval**: the periodic ticker fired and the batch is non-empty
//! - **Shutdown**: the already-buffered events are drained (still flushing
//!   at the size threshold) and whatever remains is flushed once
//!
//! The loop waits on the source, the ticker and the shutdown signal at the
//! same time, so a flush never races with a receive: the batch is owned by
//! the loop and only moved out by [`Batch::take`]. The flush runs on the
//! same thread, which means intake pauses until the commit is done.
//!
//! The ticker is injected as a channel of instants so tests can fire it by
//! hand instead of sleeping.

mod batch;
mod flusher;

pub use batch::{Batch, FlushPolicy, FlushTrigger, DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL};
pub use flusher::{
    AccumulatorSummary, FlushOutcome, FlushStats, Flusher, RetryPolicy, DEFAULT_COMMIT_RETRIES,
};

use crate::error::AccumulatorError;
use crate::event::Event;
use crate::source::EventSource;
use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Handle to the running accumulator thread
pub struct BatchAccumulator {
    handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<Sender<()>>,
    done_rx: Receiver<()>,
    stats: Arc<FlushStats>,
}

impl BatchAccumulator {
    /// Start the accumulator with a real periodic ticker
    pub fn spawn<S>(source: S, flusher: Flusher, policy: FlushPolicy) -> Result<Self, AccumulatorError>
    where
        S: EventSource + 'static,
    {
        let ticker = crossbeam_channel::tick(policy.flush_interval);
        Self::spawn_with_ticker(source, flusher, policy, ticker)
    }

    /// Start the accumulator with a caller-provided ticker
    ///
    /// Every message on `ticker` counts as one elapsed flush interval.
    pub fn spawn_with_ticker<S>(
        source: S,
        flusher: Flusher,
        policy: FlushPolicy,
        ticker: Receiver<Instant>,
    ) -> Result<Self, AccumulatorError>
    where
        S: EventSource + 'static,
    {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<()>(1);
        let stats = flusher.stats();

        let handle = thread::Builder::new()
            .name("event-accumulator".into())
            .spawn(move || {
                accumulator_loop(source, flusher, policy, ticker, shutdown_rx);
                // Dropping done_tx (even on unwind) also wakes the waiter
                let _ = done_tx.send(());
            })
            .map_err(|e| AccumulatorError::SpawnFailed(e.to_string()))?;

        Ok(Self {
            handle: Some(handle),
            shutdown_tx: Some(shutdown_tx),
            done_rx,
            stats,
        })
    }

    /// Live counters
    pub fn stats(&self) -> Arc<FlushStats> {
        Arc::clone(&self.stats)
    }

    /// Whether the thread has exited (source exhausted or shut down)
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Stop intake, drain, flush the remainder and wait for the thread
    ///
    /// With a `timeout`, gives up waiting after that long and reports
    /// [`AccumulatorError::ShutdownTimeout`]; the thread keeps running
    /// detached in that case.
    pub fn shutdown(mut self, timeout: Option<Duration>) -> Result<AccumulatorSummary, AccumulatorError> {
        // Dropping the sender is the shutdown signal
        self.shutdown_tx.take();

        if let Some(limit) = timeout {
            match self.done_rx.recv_timeout(limit) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
                Err(RecvTimeoutError::Timeout) => {
                    warn!(timeout_ms = limit.as_millis() as u64, "Accumulator shutdown timed out");
                    return Err(AccumulatorError::ShutdownTimeout(limit));
                }
            }
        }

        if let Some(handle) = self.handle.take() {
            handle.join().map_err(|_| AccumulatorError::Panicked)?;
        }

        Ok(self.stats.snapshot())
    }
}

impl Drop for BatchAccumulator {
    fn drop(&mut self) {
        // Signal only; never block in drop
        self.shutdown_tx.take();
    }
}

/// What one wait of the loop produced
enum Step {
    Event(Event),
    Tick,
    TickerGone,
    Shutdown,
    Exhausted,
}

fn accumulator_loop<S: EventSource>(
    mut source: S,
    flusher: Flusher,
    policy: FlushPolicy,
    ticker: Receiver<Instant>,
    shutdown: Receiver<()>,
) {
    let stats = flusher.stats();
    let mut batch = Batch::new(policy.batch_size);
    let never = crossbeam_channel::never::<Instant>();
    let mut ticker_alive = true;

    info!(
        source = source.name(),
        batch_size = policy.batch_size,
        flush_interval_ms = policy.flush_interval.as_millis() as u64,
        "Batch accumulator started"
    );

    loop {
        let step = {
            let events = source.events();
            let tick = if ticker_alive { &ticker } else { &never };
            select! {
                recv(shutdown) -> _ => Step::Shutdown,
                recv(events) -> msg => match msg {
                    Ok(event) => Step::Event(event),
                    Err(_) => Step::Exhausted,
                },
                recv(tick) -> msg => match msg {
                    Ok(_) => Step::Tick,
                    Err(_) => Step::TickerGone,
                },
            }
        };

        match step {
            Step::Event(event) => {
                source.record_received(1);
                stats.events_received.fetch_add(1, Ordering::Relaxed);
                if batch.push(event) {
                    flusher.flush(batch.take(), FlushTrigger::Size);
                }
            }
            Step::Tick => {
                if !batch.is_empty() {
                    flusher.flush(batch.take(), FlushTrigger::Interval);
                }
            }
            Step::TickerGone => {
                debug!("Flush ticker disconnected; interval flushes disabled");
                ticker_alive = false;
            }
            Step::Shutdown => {
                info!(pending = batch.len(), "Shutdown requested, draining buffered events");
                // Nothing may enter the buffer past this point
                source.close();
                drain_buffered(&source, &mut batch, &flusher, &stats);
                break;
            }
            Step::Exhausted => {
                debug!(source = source.name(), "Event source exhausted");
                break;
            }
        }
    }

    if !batch.is_empty() {
        flusher.flush(batch.take(), FlushTrigger::Shutdown);
    }

    let summary = stats.snapshot();
    info!(
        received = summary.events_received,
        committed = summary.events_committed,
        batches = summary.batches_flushed,
        dead_lettered = summary.events_dead_lettered,
        dropped = summary.events_dropped,
        "Batch accumulator stopped"
    );
}

/// Take everything already buffered in the source, flushing full batches
///
/// Bounded by the buffer length at the time of the call so a producer that
/// keeps sending cannot hold shutdown open.
fn drain_buffered<S: EventSource>(source: &S, batch: &mut Batch, flusher: &Flusher, stats: &FlushStats) {
    let pending = source.events().len();
    let mut drained = 0u64;

    for _ in 0..pending {
        let Ok(event) = source.events().try_recv() else {
            break;
        };
        drained += 1;
        stats.events_received.fetch_add(1, Ordering::Relaxed);
        if batch.push(event) {
            flusher.flush(batch.take(), FlushTrigger::Size);
        }
    }

    if drained > 0 {
        source.record_received(drained);
        debug!(drained, "Drained buffered events");
    }
}
