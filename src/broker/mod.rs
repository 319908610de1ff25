//! Redis pub/sub transport between ingestion and persistence
//!
//! In broker mode the HTTP server publishes every accepted event to a
//! topic and a separate consumer process subscribes to it and feeds the
//! batch accumulator. Delivery is fire-and-forget: an event published
//! while no consumer is subscribed is lost (the publisher logs and counts
//! it, but does not fail the request).

mod publisher;
mod subscriber;

pub use publisher::{EventPublisher, PublisherStats, RedisPublisher};
pub use subscriber::{BrokerSource, SubscriberStats};

/// Default pub/sub topic for analytics events
pub const DEFAULT_TOPIC: &str = "analytics:events";

/// Default broker URL
pub const DEFAULT_BROKER_URL: &str = "redis://127.0.0.1:6379";

/// Connection settings shared by publisher and subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Redis connection URL
    pub url: String,
    /// Pub/sub channel name
    pub topic: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_BROKER_URL.to_string(),
            topic: DEFAULT_TOPIC.to_string(),
        }
    }
}

impl BrokerConfig {
    /// Config for a URL (normalized) on the default topic
    pub fn with_url(url: &str) -> Self {
        Self {
            url: normalize_url(url),
            ..Default::default()
        }
    }
}

/// Accept bare `host:port` by adding the `redis://` scheme
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    if url.starts_with("redis://") || url.starts_with("rediss://") || url.starts_with("unix://") {
        url.to_string()
    } else {
        format!("redis://{}", url)
    }
}
