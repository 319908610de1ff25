//! event-sink - Batched Analytics Event Ingestion
//!
//! Accepts e-commerce analytics events (`page_view`, `add_to_cart`,
//! `purchase`) over HTTP and persists them to SQLite in batches, trading a
//! bounded delay for far fewer write transactions.
//!
//! # Features
//!
//! - **Non-blocking ingress**: handlers validate and enqueue without
//!   waiting; a full queue is rejected immediately with 503.
//!
//! - **Size or time batching**: a batch is written as soon as it holds
//!   `batch_size` events or when the flush interval elapses, whichever
//!   comes first.
//!
//! - **Atomic batches**: one transaction per batch; a failing row rolls
//!   back the whole batch, which is then retried or spilled, never lost
//!   silently.
//!
//! - **Two topologies**: everything in one process, or ingestion and
//!   persistence split across a Redis pub/sub topic.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     HTTP clients                                │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ POST /v1/events
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  axum handlers (validate)                                       │
//! │     │ try_send                         │ PUBLISH                │
//! │     ▼                                  ▼                        │
//! │  ┌──────────────────┐        ┌────────────────────┐             │
//! │  │ EventQueue       │        │ Redis topic        │             │
//! │  │ (crossbeam       │        │ analytics:events   │             │
//! │  │  bounded)        │        └─────────┬──────────┘             │
//! │  └────────┬─────────┘                  │ SUBSCRIBE              │
//! │           │ LocalQueueSource           │ BrokerSource           │
//! │           └──────────────┬─────────────┘                        │
//! │                          ▼                                      │
//! │            ┌──────────────────────────┐                         │
//! │            │   Batch Accumulator      │                         │
//! │            │  - size / interval flush │                         │
//! │            │  - drain on shutdown     │                         │
//! │            └────────────┬─────────────┘                         │
//! │                         ▼                                       │
//! │            ┌──────────────────────────┐                         │
//! │            │ Flusher → SqliteCommitter│                         │
//! │            │  - retry, dead-letter    │                         │
//! │            └──────────────────────────┘                         │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//!                    ┌──────────────────┐
//!                    │   SQLite DB      │
//!                    │  (analytics.db)  │
//!                    └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Single process
//! event-sink serve --db-path ./data/analytics.db --port 8080
//!
//! # Decoupled
//! event-sink ingest --redis-url redis://cache:6379 --port 8080
//! event-sink consume --redis-url redis://cache:6379 --db-path ./data/analytics.db
//!
//! # Send an event
//! curl -X POST localhost:8080/v1/events \
//!   -d '{"event_type":"purchase","timestamp":"2024-01-01T00:00:00Z","product_id":"prod-1","order_amount":49.99}'
//! ```

pub mod accumulator;
pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod event;
pub mod queue;
pub mod server;
pub mod source;

pub use accumulator::{AccumulatorSummary, BatchAccumulator, FlushPolicy, Flusher, RetryPolicy};
pub use config::{CliArgs, Command, SinkConfig};
pub use error::SinkError;
pub use event::{Event, EventType};
pub use queue::{EventQueue, EventQueueSender};
pub use source::{EventSource, LocalQueueSource};
