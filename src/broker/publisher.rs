//! Publishing side of the broker

use crate::broker::BrokerConfig;
use crate::error::{BrokerError, BrokerResult};
use crate::event::Event;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Something that can hand an accepted event to the broker
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one event; returns how many subscribers received it
    async fn publish(&self, event: &Event) -> BrokerResult<u64>;
}

/// Publish counters
#[derive(Debug, Default)]
pub struct PublisherStats {
    /// Events accepted by the broker
    pub published: AtomicU64,
    /// Events published while nobody was subscribed
    pub unreceived: AtomicU64,
    /// Publish calls that failed
    pub failed: AtomicU64,
}

impl PublisherStats {
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn unreceived(&self) -> u64 {
        self.unreceived.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Redis pub/sub publisher over a multiplexed async connection
pub struct RedisPublisher {
    connection: MultiplexedConnection,
    topic: String,
    stats: Arc<PublisherStats>,
}

impl RedisPublisher {
    /// Connect and verify the broker answers PING
    pub async fn connect(config: &BrokerConfig) -> BrokerResult<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| BrokerError::ConnectionFailed {
            url: config.url.clone(),
            reason: e.to_string(),
        })?;

        let mut connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BrokerError::ConnectionFailed {
                url: config.url.clone(),
                reason: e.to_string(),
            })?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(|e| BrokerError::ConnectionFailed {
                url: config.url.clone(),
                reason: format!("PING failed: {}", e),
            })?;

        info!(url = %config.url, topic = %config.topic, reply = %pong, "Connected to broker");

        Ok(Self {
            connection,
            topic: config.topic.clone(),
            stats: Arc::new(PublisherStats::default()),
        })
    }

    /// Topic events are published to
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Shared counters
    pub fn stats(&self) -> Arc<PublisherStats> {
        Arc::clone(&self.stats)
    }
}

#[async_trait]
impl EventPublisher for RedisPublisher {
    async fn publish(&self, event: &Event) -> BrokerResult<u64> {
        let payload = event.to_json()?;

        // MultiplexedConnection is a cheap handle; clones share one socket
        let mut conn = self.connection.clone();
        let receivers: u64 = conn.publish(&self.topic, payload).await.map_err(|e| {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            BrokerError::PublishFailed(e.to_string())
        })?;

        self.stats.published.fetch_add(1, Ordering::Relaxed);
        if receivers == 0 {
            self.stats.unreceived.fetch_add(1, Ordering::Relaxed);
            debug!(topic = %self.topic, event_type = %event.event_type, "Published event with no subscribers");
        }

        Ok(receivers)
    }
}
