//! Configuration types for event-sink
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros, with environment
//!   fallbacks for the deployment settings (`DB_PATH`, `PORT`, `REDIS_URL`)
//! - Runtime configuration with validation

use crate::accumulator::{FlushPolicy, RetryPolicy, DEFAULT_BATCH_SIZE, DEFAULT_COMMIT_RETRIES};
use crate::broker::{normalize_url, BrokerConfig, DEFAULT_BROKER_URL, DEFAULT_TOPIC};
use crate::db::SchemaOptions;
use crate::error::ConfigError;
use crate::queue::DEFAULT_QUEUE_CAPACITY;
use clap::{Args, Parser, Subcommand};
use redis::IntoConnectionInfo;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Queue size limits
const MIN_QUEUE_SIZE: usize = 1;
const MAX_QUEUE_SIZE: usize = 1_000_000;

/// Batch size limits
const MIN_BATCH_SIZE: usize = 1;
const MAX_BATCH_SIZE: usize = 100_000;

/// Shortest accepted flush interval
const MIN_FLUSH_INTERVAL_MS: u64 = 10;

/// Default database location
pub const DEFAULT_DB_PATH: &str = "./data/analytics.db";

/// Batched event ingestion into SQLite
#[derive(Parser, Debug, Clone)]
#[command(
    name = "event-sink",
    version,
    about = "Batched analytics event ingestion into SQLite",
    long_about = "Accepts analytics events over HTTP, buffers them in a bounded queue and \
                  writes them to SQLite in batches (by size or by time, whichever comes first).\n\n\
                  Runs either as a single process (serve) or split across a Redis topic \
                  (ingest + consume).",
    after_help = "EXAMPLES:\n    \
        event-sink serve --db-path ./data/analytics.db --port 8080\n    \
        event-sink ingest --redis-url redis://cache:6379\n    \
        event-sink consume --redis-url cache:6379 --db-path /var/lib/events.db\n    \
        event-sink stats --db-path ./data/analytics.db --json"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// HTTP ingress, queue, batch accumulator and SQLite in one process
    Serve {
        #[command(flatten)]
        db: DbArgs,

        #[command(flatten)]
        http: HttpArgs,

        /// Ingestion queue capacity; a full queue answers 503
        #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY, value_name = "NUM")]
        queue_size: usize,

        #[command(flatten)]
        batch: BatchArgs,
    },

    /// HTTP ingress publishing accepted events to Redis
    Ingest {
        #[command(flatten)]
        http: HttpArgs,

        #[command(flatten)]
        broker: BrokerArgs,
    },

    /// Subscribe to Redis and write events to SQLite in batches
    Consume {
        #[command(flatten)]
        db: DbArgs,

        #[command(flatten)]
        broker: BrokerArgs,

        /// Subscription buffer capacity
        #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY, value_name = "NUM")]
        queue_size: usize,

        #[command(flatten)]
        batch: BatchArgs,
    },

    /// Print the analytics summary of a database
    Stats {
        #[command(flatten)]
        db: DbArgs,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,

        /// Also list this many of the most recent events
        #[arg(short = 'n', long, default_value = "0", value_name = "NUM")]
        recent: usize,
    },
}

/// Database location
#[derive(Args, Debug, Clone)]
pub struct DbArgs {
    /// SQLite database file
    #[arg(long, env = "DB_PATH", default_value = DEFAULT_DB_PATH, value_name = "FILE")]
    pub db_path: PathBuf,
}

/// HTTP listener
#[derive(Args, Debug, Clone)]
pub struct HttpArgs {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "8080")]
    pub port: u16,

    /// Bind address
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: String,
}

/// Redis connection
#[derive(Args, Debug, Clone)]
pub struct BrokerArgs {
    /// Redis URL (a bare host:port is accepted)
    #[arg(long, env = "REDIS_URL", default_value = DEFAULT_BROKER_URL, value_name = "URL")]
    pub redis_url: String,

    /// Pub/sub topic
    #[arg(long, default_value = DEFAULT_TOPIC)]
    pub topic: String,
}

/// Batching and flush behavior
#[derive(Args, Debug, Clone)]
pub struct BatchArgs {
    /// Events per batch (size-triggered flush)
    #[arg(short = 'b', long, default_value_t = DEFAULT_BATCH_SIZE, value_name = "NUM")]
    pub batch_size: usize,

    /// Periodic flush interval in milliseconds
    #[arg(long, default_value = "5000", value_name = "MS")]
    pub flush_interval_ms: u64,

    /// Retries for a failed batch commit
    #[arg(long, default_value_t = DEFAULT_COMMIT_RETRIES, value_name = "NUM")]
    pub commit_retries: u32,

    /// Write batches that still fail after retries to this JSON-lines file
    #[arg(long = "dead-letter", env = "DEAD_LETTER_PATH", value_name = "FILE")]
    pub dead_letter: Option<PathBuf>,

    /// Longest wait for the final flush on shutdown
    #[arg(long, default_value = "30", value_name = "SECS")]
    pub shutdown_timeout_secs: u64,
}

impl HttpArgs {
    /// Resolve the listen address
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.bind.trim().parse().map_err(|e: std::net::AddrParseError| {
            ConfigError::InvalidBindAddress {
                addr: self.bind.clone(),
                reason: e.to_string(),
            }
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl BrokerArgs {
    /// Normalize and check the Redis URL
    pub fn to_config(&self) -> Result<BrokerConfig, ConfigError> {
        let url = normalize_url(&self.redis_url);
        url.as_str()
            .into_connection_info()
            .map_err(|e| ConfigError::InvalidBrokerUrl {
                url: self.redis_url.clone(),
                reason: e.to_string(),
            })?;

        let topic = self.topic.trim();
        if topic.is_empty() {
            return Err(ConfigError::InvalidBrokerUrl {
                url: self.redis_url.clone(),
                reason: "Topic must not be empty".to_string(),
            });
        }

        Ok(BrokerConfig {
            url,
            topic: topic.to_string(),
        })
    }
}

/// Validated configuration of a persisting process (`serve` or `consume`)
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// SQLite database file
    pub db_path: PathBuf,

    /// Queue / subscription buffer capacity
    pub queue_size: usize,

    /// Size and time flush triggers
    pub flush: FlushPolicy,

    /// Commit retry schedule
    pub retry: RetryPolicy,

    /// Spill file for batches that cannot be committed
    pub dead_letter_path: Option<PathBuf>,

    /// Budget for the final flush
    pub shutdown_timeout: Duration,

    /// Schema options (the broker consumer adds the timestamp index)
    pub schema: SchemaOptions,
}

impl SinkConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(db: &DbArgs, queue_size: usize, batch: &BatchArgs) -> Result<Self, ConfigError> {
        // Validate queue size
        if !(MIN_QUEUE_SIZE..=MAX_QUEUE_SIZE).contains(&queue_size) {
            return Err(ConfigError::InvalidQueueSize {
                size: queue_size,
                min: MIN_QUEUE_SIZE,
                max: MAX_QUEUE_SIZE,
            });
        }

        // Validate batch size
        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&batch.batch_size) {
            return Err(ConfigError::InvalidBatchSize {
                size: batch.batch_size,
                min: MIN_BATCH_SIZE,
                max: MAX_BATCH_SIZE,
            });
        }

        if batch.flush_interval_ms < MIN_FLUSH_INTERVAL_MS {
            return Err(ConfigError::InvalidFlushInterval {
                millis: batch.flush_interval_ms,
                min: MIN_FLUSH_INTERVAL_MS,
            });
        }

        validate_db_path(&db.db_path)?;
        if let Some(dead_letter) = &batch.dead_letter {
            if dead_letter == &db.db_path {
                return Err(ConfigError::InvalidDbPath {
                    path: dead_letter.clone(),
                    reason: "Dead-letter file must differ from the database".to_string(),
                });
            }
        }

        Ok(Self {
            db_path: db.db_path.clone(),
            queue_size,
            flush: FlushPolicy {
                batch_size: batch.batch_size,
                flush_interval: Duration::from_millis(batch.flush_interval_ms),
            },
            retry: RetryPolicy {
                max_retries: batch.commit_retries,
                ..RetryPolicy::default()
            },
            dead_letter_path: batch.dead_letter.clone(),
            shutdown_timeout: Duration::from_secs(batch.shutdown_timeout_secs),
            schema: SchemaOptions::default(),
        })
    }

    /// Also index `timestamp`
    pub fn with_timestamp_index(mut self) -> Self {
        self.schema.timestamp_index = true;
        self
    }
}

/// Reject paths that can never be a database file
pub fn validate_db_path(path: &std::path::Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::InvalidDbPath {
            path: path.to_path_buf(),
            reason: "Path is empty".to_string(),
        });
    }

    if path.is_dir() {
        return Err(ConfigError::InvalidDbPath {
            path: path.to_path_buf(),
            reason: "Path is a directory".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("event-sink").chain(args.iter().copied())).unwrap()
    }

    fn batch_args() -> BatchArgs {
        BatchArgs {
            batch_size: 100,
            flush_interval_ms: 5000,
            commit_retries: 3,
            dead_letter: None,
            shutdown_timeout_secs: 30,
        }
    }

    fn db_args(path: &str) -> DbArgs {
        DbArgs {
            db_path: PathBuf::from(path),
        }
    }

    #[test]
    fn test_serve_defaults() {
        let args = parse(&["serve", "--db-path", "x.db"]);
        let Command::Serve { db, http, queue_size, batch } = args.command else {
            panic!("expected serve");
        };

        assert_eq!(db.db_path, PathBuf::from("x.db"));
        assert_eq!(queue_size, 1000);
        assert_eq!(batch.batch_size, 100);
        assert_eq!(batch.flush_interval_ms, 5000);
        assert_eq!(batch.commit_retries, 3);

        let config = SinkConfig::from_args(&db, queue_size, &batch).unwrap();
        assert_eq!(config.flush, FlushPolicy::default());
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
        assert!(!config.schema.timestamp_index);

        assert_eq!(http.socket_addr().unwrap().port(), http.port);
    }

    #[test]
    fn test_verbose_is_global() {
        let args = parse(&["stats", "-v", "--json"]);
        assert!(args.verbose);
        assert!(matches!(args.command, Command::Stats { json: true, .. }));
    }

    #[test]
    fn test_invalid_sizes_rejected() {
        let mut batch = batch_args();
        batch.batch_size = 0;
        assert!(matches!(
            SinkConfig::from_args(&db_args("a.db"), 10, &batch),
            Err(ConfigError::InvalidBatchSize { .. })
        ));

        assert!(matches!(
            SinkConfig::from_args(&db_args("a.db"), 0, &batch_args()),
            Err(ConfigError::InvalidQueueSize { .. })
        ));

        let mut batch = batch_args();
        batch.flush_interval_ms = 1;
        assert!(matches!(
            SinkConfig::from_args(&db_args("a.db"), 10, &batch),
            Err(ConfigError::InvalidFlushInterval { .. })
        ));
    }

    #[test]
    fn test_db_path_checks() {
        let dir = tempfile::tempdir().unwrap();
        let as_dir = DbArgs {
            db_path: dir.path().to_path_buf(),
        };
        assert!(matches!(
            SinkConfig::from_args(&as_dir, 10, &batch_args()),
            Err(ConfigError::InvalidDbPath { .. })
        ));

        let mut batch = batch_args();
        batch.dead_letter = Some(PathBuf::from("same.db"));
        assert!(matches!(
            SinkConfig::from_args(&db_args("same.db"), 10, &batch),
            Err(ConfigError::InvalidDbPath { .. })
        ));
    }

    #[test]
    fn test_broker_url_normalized() {
        let broker = BrokerArgs {
            redis_url: "cache:6379".into(),
            topic: DEFAULT_TOPIC.into(),
        };
        let config = broker.to_config().unwrap();
        assert_eq!(config.url, "redis://cache:6379");
        assert_eq!(config.topic, "analytics:events");

        let empty_topic = BrokerArgs {
            redis_url: "redis://cache".into(),
            topic: "  ".into(),
        };
        assert!(empty_topic.to_config().is_err());
    }

    #[test]
    fn test_bind_address_validation() {
        let http = HttpArgs {
            port: 9000,
            bind: "127.0.0.1".into(),
        };
        assert_eq!(http.socket_addr().unwrap(), "127.0.0.1:9000".parse().unwrap());

        let bad = HttpArgs {
            port: 9000,
            bind: "not-an-ip".into(),
        };
        assert!(matches!(bad.socket_addr(), Err(ConfigError::InvalidBindAddress { .. })));
    }

    #[test]
    fn test_consume_gets_timestamp_index() {
        let config = SinkConfig::from_args(&db_args("a.db"), 10, &batch_args())
            .unwrap()
            .with_timestamp_index();
        assert!(config.schema.timestamp_index);
    }
}
