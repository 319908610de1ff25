//! Subscribing side of the broker
//!
//! A background thread holds a blocking Redis pub/sub connection and
//! forwards decoded events into a bounded channel that the accumulator
//! selects on. Reads use a short socket timeout so the thread can notice
//! the stop flag without waiting for the next message.

use crate::broker::BrokerConfig;
use crate::error::{BrokerError, BrokerResult};
use crate::event::Event;
use crate::source::EventSource;
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use redis::Client;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How often the subscriber thread checks the stop flag
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Subscription counters
#[derive(Debug, Default)]
pub struct SubscriberStats {
    /// Messages decoded and forwarded
    pub received: AtomicU64,
    /// Messages skipped because they did not decode to an event
    pub malformed: AtomicU64,
    /// Decoded events lost because the consumer stopped while the buffer was full
    pub dropped: AtomicU64,
}

impl SubscriberStats {
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Event source backed by a Redis pub/sub subscription
pub struct BrokerSource {
    receiver: Receiver<Event>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    stats: Arc<SubscriberStats>,
}

impl BrokerSource {
    /// Connect, subscribe to the topic and start forwarding
    ///
    /// Returns once the subscription is confirmed, so connection and
    /// subscribe failures surface here rather than in the background.
    pub fn subscribe(config: &BrokerConfig, capacity: usize) -> BrokerResult<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| BrokerError::ConnectionFailed {
            url: config.url.clone(),
            reason: e.to_string(),
        })?;

        let conn = client.get_connection().map_err(|e| BrokerError::ConnectionFailed {
            url: config.url.clone(),
            reason: e.to_string(),
        })?;
        conn.set_read_timeout(Some(POLL_INTERVAL))?;

        let (tx, rx) = bounded(capacity.max(1));
        let (ready_tx, ready_rx) = bounded::<BrokerResult<()>>(1);
        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(SubscriberStats::default());

        let topic = config.topic.clone();
        let stop_clone = Arc::clone(&stop);
        let stats_clone = Arc::clone(&stats);

        let handle = thread::Builder::new()
            .name("broker-subscriber".into())
            .spawn(move || subscriber_loop(conn, topic, tx, ready_tx, stop_clone, stats_clone))
            .map_err(|e| BrokerError::SubscribeFailed {
                topic: config.topic.clone(),
                reason: format!("Failed to spawn subscriber thread: {}", e),
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(BrokerError::SubscribeFailed {
                    topic: config.topic.clone(),
                    reason: "Subscriber thread exited before subscribing".into(),
                });
            }
        }

        info!(url = %config.url, topic = %config.topic, "Subscribed to broker topic");

        Ok(Self {
            receiver: rx,
            stop,
            handle: Some(handle),
            stats,
        })
    }

    /// Forward from an in-process reader instead of a Redis connection
    #[cfg(test)]
    fn with_reader(mut read: impl FnMut() -> Poll + Send + 'static, capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(SubscriberStats::default());

        let stop_clone = Arc::clone(&stop);
        let stats_clone = Arc::clone(&stats);
        let handle = thread::spawn(move || {
            forward_loop(&mut read, &tx, &stop_clone, &stats_clone, "analytics:events");
        });

        Self {
            receiver: rx,
            stop,
            handle: Some(handle),
            stats,
        }
    }

    /// Shared counters
    pub fn stats(&self) -> Arc<SubscriberStats> {
        Arc::clone(&self.stats)
    }

    fn stop_thread(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Broker subscriber thread panicked");
            }
        }
    }
}

impl EventSource for BrokerSource {
    fn name(&self) -> &'static str {
        "broker"
    }

    fn events(&self) -> &Receiver<Event> {
        &self.receiver
    }

    fn close(&mut self) {
        self.stop_thread();
    }
}

impl Drop for BrokerSource {
    fn drop(&mut self) {
        self.stop_thread();
    }
}

fn subscriber_loop(
    mut conn: redis::Connection,
    topic: String,
    tx: Sender<Event>,
    ready: Sender<BrokerResult<()>>,
    stop: Arc<AtomicBool>,
    stats: Arc<SubscriberStats>,
) {
    let mut pubsub = conn.as_pubsub();

    if let Err(e) = pubsub.subscribe(&topic) {
        let _ = ready.send(Err(BrokerError::SubscribeFailed {
            topic,
            reason: e.to_string(),
        }));
        return;
    }
    let _ = ready.send(Ok(()));

    let poll = || match pubsub.get_message() {
        Ok(msg) => Poll::Message(msg.get_payload_bytes().to_vec()),
        Err(e) if e.is_timeout() => Poll::Idle,
        Err(e) => Poll::Lost(e.to_string()),
    };
    forward_loop(poll, &tx, &stop, &stats, &topic);

    if let Err(e) = pubsub.unsubscribe(&topic) {
        debug!(error = %e, "Unsubscribe failed");
    }
    debug!(topic = %topic, "Broker subscriber stopped");
}

/// One read from the subscription
enum Poll {
    Message(Vec<u8>),
    /// Read timed out with nothing to deliver
    Idle,
    Lost(String),
}

/// Decode and forward payloads until stopped, the consumer goes away or the
/// subscription is lost
fn forward_loop(
    mut poll: impl FnMut() -> Poll,
    tx: &Sender<Event>,
    stop: &AtomicBool,
    stats: &SubscriberStats,
    topic: &str,
) {
    while !stop.load(Ordering::SeqCst) {
        let payload = match poll() {
            Poll::Message(payload) => payload,
            Poll::Idle => continue,
            Poll::Lost(reason) => {
                error!(error = %reason, topic = %topic, "Broker subscription lost");
                break;
            }
        };

        let event = match Event::from_json_slice(&payload) {
            Ok(event) => event,
            Err(e) => {
                stats.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, topic = %topic, "Skipping malformed broker message");
                continue;
            }
        };

        if !forward(tx, event, stop) {
            stats.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("Consumer stopped with a full buffer; event dropped");
            break;
        }
        stats.received.fetch_add(1, Ordering::Relaxed);
    }
}

/// Block until the event fits in the channel; false if it could not be delivered
fn forward(tx: &Sender<Event>, mut event: Event, stop: &AtomicBool) -> bool {
    loop {
        match tx.send_timeout(event, POLL_INTERVAL) {
            Ok(()) => return true,
            Err(SendTimeoutError::Disconnected(_)) => return false,
            Err(SendTimeoutError::Timeout(back)) => {
                if stop.load(Ordering::SeqCst) {
                    return false;
                }
                event = back;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use chrono::Utc;
    use crossbeam_channel::RecvTimeoutError;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    const PURCHASE: &[u8] =
        br#"{"event_type":"purchase","timestamp":"2024-01-01T00:00:00Z","product_id":"prod-1","order_amount":49.99}"#;

    /// Hands out the scripted reads, then idles
    fn scripted(reads: Vec<Poll>) -> impl FnMut() -> Poll + Send + 'static {
        let mut reads = VecDeque::from(reads);
        move || match reads.pop_front() {
            Some(read) => read,
            None => {
                thread::sleep(Duration::from_millis(5));
                Poll::Idle
            }
        }
    }

    #[test]
    fn test_malformed_messages_are_skipped() {
        let mut source = BrokerSource::with_reader(
            scripted(vec![
                Poll::Message(b"not json".to_vec()),
                Poll::Idle,
                Poll::Message(br#"{"event_type":"refund","timestamp":"2024-01-01T00:00:00Z"}"#.to_vec()),
                Poll::Message(PURCHASE.to_vec()),
            ]),
            8,
        );
        let stats = source.stats();

        let event = source.events().recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(event.event_type, EventType::Purchase);
        assert_eq!(event.product_id.as_deref(), Some("prod-1"));

        source.close();
        assert_eq!(stats.malformed(), 2);
        assert_eq!(stats.received(), 1);
        assert!(source.events().try_recv().is_err());
    }

    #[test]
    fn test_close_unblocks_forward_on_full_buffer() {
        let reads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&reads);
        let mut source = BrokerSource::with_reader(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Poll::Message(PURCHASE.to_vec())
            },
            1,
        );
        let stats = source.stats();

        // First event fills the buffer, the second is stuck in forward
        let deadline = Instant::now() + Duration::from_secs(5);
        while reads.load(Ordering::SeqCst) < 2 {
            assert!(Instant::now() < deadline, "reader never blocked");
            thread::sleep(Duration::from_millis(5));
        }
        thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        source.close();
        assert!(started.elapsed() < Duration::from_secs(2));

        assert_eq!(stats.received(), 1);
        assert_eq!(stats.dropped(), 1);
        assert_eq!(source.events().try_iter().count(), 1);
    }

    #[test]
    fn test_lost_subscription_disconnects_source() {
        let source = BrokerSource::with_reader(
            scripted(vec![
                Poll::Message(PURCHASE.to_vec()),
                Poll::Lost("connection reset".into()),
            ]),
            8,
        );

        assert!(source.events().recv_timeout(Duration::from_secs(5)).is_ok());
        assert_eq!(
            source.events().recv_timeout(Duration::from_secs(5)),
            Err(RecvTimeoutError::Disconnected)
        );
        assert_eq!(source.stats().received(), 1);
    }

    #[test]
    fn test_forward_waits_for_room() {
        let (tx, rx) = bounded(1);
        let stop = Arc::new(AtomicBool::new(false));
        tx.send(Event::new(EventType::PageView, Utc::now())).unwrap();

        let consumer = {
            let rx = rx.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                rx.recv().unwrap()
            })
        };

        assert!(forward(&tx, Event::new(EventType::Purchase, Utc::now()), &stop));
        consumer.join().unwrap();
        assert_eq!(rx.recv().unwrap().event_type, EventType::Purchase);
    }

    #[test]
    fn test_forward_gives_up_when_stopped() {
        let (tx, _rx) = bounded(1);
        let stop = AtomicBool::new(true);
        tx.send(Event::new(EventType::PageView, Utc::now())).unwrap();

        assert!(!forward(&tx, Event::new(EventType::Purchase, Utc::now()), &stop));
    }

    #[test]
    fn test_subscribe_unreachable_broker_fails() {
        // Port 1 on loopback refuses connections
        let config = BrokerConfig {
            url: "redis://127.0.0.1:1".into(),
            topic: "analytics:events".into(),
        };
        let result = BrokerSource::subscribe(&config, 16);
        assert!(matches!(result, Err(BrokerError::ConnectionFailed { .. })));
    }
}
