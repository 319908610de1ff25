//! event-sink - Batched Analytics Event Ingestion
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use event_sink::accumulator::{BatchAccumulator, Flusher};
use event_sink::broker::{BrokerConfig, BrokerSource, RedisPublisher};
use event_sink::config::{CliArgs, Command, SinkConfig};
use event_sink::db::{self, analytics, AnalyticsSummary, DeadLetterFile, EventRecord, SqliteCommitter};
use event_sink::queue::EventQueue;
use event_sink::server::{self, shutdown_signal, AppState, Ingress};
use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    match args.command {
        Command::Serve {
            db,
            http,
            queue_size,
            batch,
        } => {
            let config = SinkConfig::from_args(&db, queue_size, &batch).context("Invalid configuration")?;
            let addr = http.socket_addr().context("Invalid configuration")?;
            run_serve(config, addr)
        }
        Command::Ingest { http, broker } => {
            let addr = http.socket_addr().context("Invalid configuration")?;
            let broker = broker.to_config().context("Invalid configuration")?;
            run_ingest(addr, broker)
        }
        Command::Consume {
            db,
            broker,
            queue_size,
            batch,
        } => {
            let config = SinkConfig::from_args(&db, queue_size, &batch)
                .context("Invalid configuration")?
                .with_timestamp_index();
            let broker = broker.to_config().context("Invalid configuration")?;
            run_consume(config, broker)
        }
        Command::Stats { db, json, recent } => run_stats(&db.db_path, json, recent),
    }
}

/// Single process: HTTP → queue → accumulator → SQLite
fn run_serve(config: SinkConfig, addr: SocketAddr) -> Result<()> {
    let flusher = open_flusher(&config)?;

    let queue = EventQueue::new(config.queue_size);
    let sender = queue.sender();
    let queue_stats = queue.stats();

    let accumulator = BatchAccumulator::spawn(queue.into_source(), flusher, config.flush)
        .context("Failed to start batch accumulator")?;

    let state = Arc::new(AppState::new(Ingress::Queue(sender)).with_analytics(config.db_path.clone()));

    let runtime = build_runtime()?;
    // The router (and every queue sender it holds) is gone once serve returns
    let served = runtime.block_on(server::serve(state, addr, shutdown_signal()));
    drop(runtime);

    let finished = finish_accumulator(accumulator, config.shutdown_timeout);

    info!(
        accepted = queue_stats.accepted(),
        rejected = queue_stats.rejected(),
        "Ingestion queue totals"
    );

    served.context("HTTP server failed")?;
    finished
}

/// Decoupled ingestion: HTTP → Redis topic
fn run_ingest(addr: SocketAddr, broker: BrokerConfig) -> Result<()> {
    let runtime = build_runtime()?;

    runtime.block_on(async move {
        let publisher = RedisPublisher::connect(&broker)
            .await
            .context("Failed to connect to broker")?;
        let stats = publisher.stats();

        let state = Arc::new(AppState::new(Ingress::Broker(Arc::new(publisher))));
        server::serve(state, addr, shutdown_signal())
            .await
            .context("HTTP server failed")?;

        info!(
            published = stats.published(),
            unreceived = stats.unreceived(),
            failed = stats.failed(),
            "Publisher totals"
        );
        Ok(())
    })
}

/// Decoupled persistence: Redis topic → accumulator → SQLite
fn run_consume(config: SinkConfig, broker: BrokerConfig) -> Result<()> {
    let flusher = open_flusher(&config)?;

    let source = BrokerSource::subscribe(&broker, config.queue_size).context("Failed to subscribe to broker")?;
    let subscriber_stats = source.stats();

    let accumulator =
        BatchAccumulator::spawn(source, flusher, config.flush).context("Failed to start batch accumulator")?;

    // Setup signal handler for graceful shutdown
    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })
    .context("Failed to set signal handler")?;

    info!(topic = %broker.topic, db = %config.db_path.display(), "Consumer running");

    let mut subscription_lost = false;
    loop {
        match shutdown_rx.recv_timeout(Duration::from_millis(500)) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                info!("Interrupt received, shutting down");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                if accumulator.is_finished() {
                    subscription_lost = true;
                    break;
                }
            }
        }
    }

    finish_accumulator(accumulator, config.shutdown_timeout)?;

    info!(
        received = subscriber_stats.received(),
        malformed = subscriber_stats.malformed(),
        dropped = subscriber_stats.dropped(),
        "Subscriber totals"
    );

    if subscription_lost {
        anyhow::bail!("Broker subscription ended unexpectedly");
    }
    Ok(())
}

/// Print the analytics summary of a database
fn run_stats(db_path: &Path, json: bool, recent: usize) -> Result<()> {
    let conn = db::open_read_only(db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    let summary = analytics::summarize(&conn).context("Failed to compute summary")?;
    let total = analytics::total_events(&conn)?;
    let events = if recent > 0 {
        analytics::recent_events(&conn, recent)?
    } else {
        Vec::new()
    };

    if json {
        let out = serde_json::json!({
            "total_events": total,
            "summary": summary,
            "recent_events": events,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_summary(db_path, total, &summary, &events);
    }

    Ok(())
}

fn print_summary(db_path: &Path, total: u64, summary: &AnalyticsSummary, events: &[EventRecord]) {
    println!("Database:          {}", db_path.display());
    println!("Total events:      {}", total);
    println!("  page_view:       {}", summary.total_page_views);
    println!("  add_to_cart:     {}", summary.total_add_to_carts);
    println!("  purchase:        {}", summary.total_purchases);
    println!("Conversion rate:   {:.2}%", summary.conversion_rate);
    println!(
        "Purchase value:    avg {:.2}  max {:.2}  min {:.2}",
        summary.average_purchase_value, summary.max_purchase_value, summary.min_purchase_value
    );
    println!(
        "Top product:       {}",
        summary.top_product_id.as_deref().unwrap_or("-")
    );

    if !events.is_empty() {
        println!();
        println!("Recent events:");
        for event in events {
            println!(
                "  #{:<8} {:<12} {}  {:<12} {}",
                event.id,
                event.event_type,
                event.timestamp.to_rfc3339(),
                event.product_id.as_deref().unwrap_or("-"),
                event
                    .order_amount
                    .map(|a| format!("{:.2}", a))
                    .unwrap_or_else(|| "-".to_string()),
            );
        }
    }
}

/// Open the database and wrap the committer with retry and dead-letter handling
fn open_flusher(config: &SinkConfig) -> Result<Flusher> {
    let conn = db::open_database(&config.db_path, config.schema)
        .with_context(|| format!("Failed to open database {}", config.db_path.display()))?;

    let mut flusher = Flusher::new(Arc::new(SqliteCommitter::new(conn)), config.retry);

    if let Some(path) = &config.dead_letter_path {
        let dead_letter = DeadLetterFile::open(path)
            .with_context(|| format!("Failed to open dead-letter file {}", path.display()))?;
        info!(path = %path.display(), "Dead-letter spill enabled");
        flusher = flusher.with_dead_letter(dead_letter);
    }

    info!(
        db = %config.db_path.display(),
        batch_size = config.flush.batch_size,
        flush_interval_ms = config.flush.flush_interval.as_millis() as u64,
        commit_retries = config.retry.max_retries,
        "Database ready"
    );

    Ok(flusher)
}

/// Stop the accumulator and report what happened to the buffered events
fn finish_accumulator(accumulator: BatchAccumulator, timeout: Duration) -> Result<()> {
    let summary = accumulator
        .shutdown(Some(timeout))
        .context("Batch accumulator did not shut down cleanly")?;

    info!(
        received = summary.events_received,
        committed = summary.events_committed,
        batches = summary.batches_flushed,
        retries = summary.commit_retries,
        dead_lettered = summary.events_dead_lettered,
        "Shutdown complete"
    );

    if summary.events_dropped > 0 {
        warn!(dropped = summary.events_dropped, "Some events could not be persisted");
    }

    Ok(())
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("event-sink-http")
        .build()
        .context("Failed to create async runtime")
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("event_sink=debug,tower_http=debug,warn")
    } else {
        EnvFilter::new("event_sink=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
