//! Event sources feeding the batch accumulator
//!
//! The accumulator does not care whether events come from the in-process
//! queue or from a broker subscription. Both expose the same capability: a
//! channel the accumulator can block on alongside its flush timer and
//! shutdown signal.
//!
//! Implementations:
//! - [`LocalQueueSource`]: the consumer half of [`crate::queue::EventQueue`]
//! - [`crate::broker::BrokerSource`]: a Redis pub/sub subscription

use crate::event::Event;
use crate::queue::QueueStats;
use crossbeam_channel::Receiver;
use parking_lot::RwLock;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// A blocking stream of events for a single consumer
pub trait EventSource: Send {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Channel carrying the next events
    ///
    /// The accumulator selects on this together with its timer and shutdown
    /// channels. A disconnected channel means the source is exhausted.
    fn events(&self) -> &Receiver<Event>;

    /// Block until the next event arrives; `None` once the source is exhausted
    fn next(&self) -> Option<Event> {
        self.events().recv().ok()
    }

    /// Bookkeeping hook called for every event the accumulator takes
    fn record_received(&self, _count: u64) {}

    /// Stop intake; already-buffered events stay readable
    ///
    /// Once this returns no new event may enter [`EventSource::events`], so
    /// a drain that follows sees everything that was ever accepted.
    fn close(&mut self) {}
}

/// Event source backed by the in-process ingestion queue
pub struct LocalQueueSource {
    receiver: Receiver<Event>,
    stats: Arc<QueueStats>,
    closed: Arc<RwLock<bool>>,
}

impl LocalQueueSource {
    pub(crate) fn new(receiver: Receiver<Event>, stats: Arc<QueueStats>, closed: Arc<RwLock<bool>>) -> Self {
        Self {
            receiver,
            stats,
            closed,
        }
    }

    /// Queue statistics shared with the producers
    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }
}

impl EventSource for LocalQueueSource {
    fn name(&self) -> &'static str {
        "local-queue"
    }

    fn events(&self) -> &Receiver<Event> {
        &self.receiver
    }

    fn record_received(&self, count: u64) {
        self.stats.dequeued.fetch_add(count, Ordering::Relaxed);
    }

    /// Producers get `QueueError::Closed` from now on
    fn close(&mut self) {
        *self.closed.write() = true;
    }
}

impl Drop for LocalQueueSource {
    fn drop(&mut self) {
        self.close();
    }
}
