//! The in-flight batch and the flush policy

use crate::event::Event;
use std::fmt;
use std::time::Duration;

/// Default number of events that triggers a size flush
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default periodic flush interval
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// When to flush: whichever of size or time comes first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Flush as soon as the batch holds this many events
    pub batch_size: usize,

    /// Flush a non-empty batch at this period
    pub flush_interval: Duration,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

/// What caused a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// Batch reached the size threshold
    Size,
    /// Periodic timer fired with a non-empty batch
    Interval,
    /// Final flush while shutting down
    Shutdown,
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Interval => "interval",
            FlushTrigger::Shutdown => "shutdown",
        })
    }
}

/// Ordered buffer of events owned by the accumulator
///
/// [`Batch::take`] moves the filled buffer out and leaves a fresh one in
/// its place, so the events handed to the committer can never alias the
/// buffer that keeps receiving new events.
#[derive(Debug)]
pub struct Batch {
    events: Vec<Event>,
    threshold: usize,
}

impl Batch {
    /// Create an empty batch with the given size threshold
    pub fn new(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            events: Vec::with_capacity(threshold),
            threshold,
        }
    }

    /// Append an event; returns `true` once the threshold is reached
    pub fn push(&mut self, event: Event) -> bool {
        self.events.push(event);
        self.is_full()
    }

    /// Whether the size threshold has been reached
    pub fn is_full(&self) -> bool {
        self.events.len() >= self.threshold
    }

    /// Number of buffered events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if the batch is empty
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Hand off the buffered events and reset to an empty buffer
    pub fn take(&mut self) -> Vec<Event> {
        std::mem::replace(&mut self.events, Vec::with_capacity(self.threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use chrono::Utc;

    fn event(product: &str) -> Event {
        Event::new(EventType::PageView, Utc::now()).with_product(product)
    }

    #[test]
    fn test_push_reports_threshold() {
        let mut batch = Batch::new(3);
        assert!(!batch.push(event("a")));
        assert!(!batch.push(event("b")));
        assert!(batch.push(event("c")));
        assert!(batch.is_full());
    }

    #[test]
    fn test_take_resets_and_keeps_order() {
        let mut batch = Batch::new(10);
        batch.push(event("a"));
        batch.push(event("b"));

        let taken = batch.take();
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);

        let products: Vec<_> = taken.iter().map(|e| e.product_id.as_deref().unwrap()).collect();
        assert_eq!(products, vec!["a", "b"]);

        // New events go to the fresh buffer only
        batch.push(event("c"));
        assert_eq!(taken.len(), 2);
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_zero_threshold_clamped() {
        let mut batch = Batch::new(0);
        assert!(batch.push(event("a")));
    }

    #[test]
    fn test_default_policy() {
        let policy = FlushPolicy::default();
        assert_eq!(policy.batch_size, 100);
        assert_eq!(policy.flush_interval, Duration::from_secs(5));
    }
}
