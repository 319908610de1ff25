//! Ingestion queue with drop-on-full backpressure
//!
//! A bounded buffer between request handlers and the batch accumulator.
//! Producers never wait: when the buffer is full the event is rejected
//! immediately and the caller is told to retry (HTTP 503), which keeps
//! request latency bounded regardless of how far behind storage is.

use crate::error::QueueError;
use crate::event::Event;
use crate::source::LocalQueueSource;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Default queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Statistics for the ingestion queue
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Events accepted into the queue
    pub accepted: AtomicU64,

    /// Events rejected because the queue was full
    pub rejected: AtomicU64,

    /// Events taken out by the consumer
    pub dequeued: AtomicU64,
}

impl QueueStats {
    /// Number of accepted events
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Number of rejected events
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Number of dequeued events
    pub fn dequeued(&self) -> u64 {
        self.dequeued.load(Ordering::Relaxed)
    }
}

/// Bounded event queue
///
/// Owns the single receiver; hand it to the accumulator with
/// [`EventQueue::into_source`] after taking as many senders as needed.
pub struct EventQueue {
    sender: Sender<Event>,
    receiver: Receiver<Event>,
    capacity: usize,
    stats: Arc<QueueStats>,
    closed: Arc<RwLock<bool>>,
}

impl EventQueue {
    /// Create a new queue with the specified capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);

        Self {
            sender,
            receiver,
            capacity,
            stats: Arc::new(QueueStats::default()),
            closed: Arc::new(RwLock::new(false)),
        }
    }

    /// Get a producer handle (clone freely, one per request context)
    pub fn sender(&self) -> EventQueueSender {
        EventQueueSender {
            sender: self.sender.clone(),
            capacity: self.capacity,
            stats: Arc::clone(&self.stats),
            closed: Arc::clone(&self.closed),
        }
    }

    /// Get queue statistics
    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }

    /// Current number of buffered events
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Turn the consumer side into an event source for the accumulator
    ///
    /// The queue's own sender is dropped here, so the source reports
    /// disconnection once every handed-out [`EventQueueSender`] is gone.
    pub fn into_source(self) -> LocalQueueSource {
        LocalQueueSource::new(self.receiver, self.stats, self.closed)
    }
}

/// Producer handle for the ingestion queue
#[derive(Clone)]
pub struct EventQueueSender {
    sender: Sender<Event>,
    capacity: usize,
    stats: Arc<QueueStats>,
    closed: Arc<RwLock<bool>>,
}

impl EventQueueSender {
    /// Offer an event to the queue without blocking
    ///
    /// Returns `Err(QueueError::CapacityExceeded)` when the queue is full and
    /// `Err(QueueError::Closed)` when the consumer has gone away or has
    /// stopped intake for shutdown.
    pub fn enqueue(&self, event: Event) -> Result<(), QueueError> {
        // Held across the send so closing waits for in-progress enqueues
        let closed = self.closed.read();
        if *closed {
            return Err(QueueError::Closed);
        }

        match self.sender.try_send(event) {
            Ok(()) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                Err(QueueError::CapacityExceeded {
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Disconnected(_)) => Err(QueueError::Closed),
        }
    }

    /// Current number of buffered events
    pub fn len(&self) -> usize {
        self.sender.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }

    /// Queue statistics
    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use crate::source::EventSource;
    use chrono::Utc;
    use std::time::{Duration, Instant};

    fn page_view() -> Event {
        Event::new(EventType::PageView, Utc::now())
    }

    #[test]
    fn test_queue_basic() {
        let queue = EventQueue::new(10);
        let sender = queue.sender();

        sender.enqueue(page_view()).unwrap();
        assert_eq!(queue.len(), 1);

        let source = queue.into_source();
        let event = source.events().try_recv().unwrap();
        assert_eq!(event.event_type, EventType::PageView);
    }

    #[test]
    fn test_queue_rejects_when_full() {
        let queue = EventQueue::new(2);
        let sender = queue.sender();

        sender.enqueue(page_view()).unwrap();
        sender.enqueue(page_view()).unwrap();

        // Full: rejected immediately instead of blocking
        let started = Instant::now();
        let err = sender.enqueue(page_view()).unwrap_err();
        assert!(started.elapsed() < Duration::from_millis(50));
        assert_eq!(err, QueueError::CapacityExceeded { capacity: 2 });

        assert_eq!(queue.stats().accepted(), 2);
        assert_eq!(queue.stats().rejected(), 1);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_queue_closed_after_consumer_dropped() {
        let queue = EventQueue::new(4);
        let sender = queue.sender();

        drop(queue.into_source());

        assert_eq!(sender.enqueue(page_view()), Err(QueueError::Closed));
    }

    #[test]
    fn test_concurrent_producers() {
        let queue = EventQueue::new(1000);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sender = queue.sender();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        sender.enqueue(page_view()).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.len(), 400);
        assert_eq!(queue.stats().accepted(), 400);
    }
}
