//! HTTP ingress
//!
//! Validates incoming events and hands them to an [`Ingress`]: either the
//! in-process queue (single-process variant) or the broker publisher
//! (ingestion half of the decoupled variant).

pub mod routes;

pub use routes::{build_router, serve, shutdown_signal};

use crate::broker::EventPublisher;
use crate::error::ApiError;
use crate::event::Event;
use crate::queue::EventQueueSender;
use std::path::PathBuf;
use std::sync::Arc;

/// Where accepted events go
#[derive(Clone)]
pub enum Ingress {
    /// Non-blocking enqueue; full queue = 503
    Queue(EventQueueSender),
    /// Publish to the broker; failure = 500
    Broker(Arc<dyn EventPublisher>),
}

impl Ingress {
    /// Hand off one validated event
    pub async fn submit(&self, event: Event) -> Result<(), ApiError> {
        match self {
            Ingress::Queue(sender) => sender.enqueue(event)?,
            Ingress::Broker(publisher) => {
                publisher.publish(&event).await?;
            }
        }
        Ok(())
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Ingress::Queue(_) => "queue",
            Ingress::Broker(_) => "broker",
        }
    }
}

/// Shared application state
pub struct AppState {
    pub ingress: Ingress,
    /// Database backing `GET /v1/analytics`; the route is absent without one
    pub db_path: Option<PathBuf>,
}

impl AppState {
    pub fn new(ingress: Ingress) -> Self {
        Self {
            ingress,
            db_path: None,
        }
    }

    pub fn with_analytics(mut self, db_path: PathBuf) -> Self {
        self.db_path = Some(db_path);
        self
    }
}
