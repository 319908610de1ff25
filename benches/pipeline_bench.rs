//! Benchmarks for event-sink
//!
//! Run with: cargo bench

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use event_sink::db::{create_database, Committer, SchemaOptions, SqliteCommitter};
use event_sink::event::{Event, EventType};
use event_sink::queue::EventQueue;
use event_sink::source::EventSource;

fn benchmark_queue_operations(c: &mut Criterion) {
    c.bench_function("queue_enqueue_dequeue", |b| {
        let queue = EventQueue::new(10000);
        let sender = queue.sender();
        let source = queue.into_source();

        b.iter(|| {
            let event = Event::new(EventType::PageView, Utc::now()).with_product("prod-1");
            sender.enqueue(event).unwrap();
            let received = source.events().try_recv().unwrap();
            black_box(received);
        })
    });
}

fn benchmark_event_decode(c: &mut Criterion) {
    let body = br#"{"event_type":"purchase","timestamp":"2024-01-01T00:00:00Z","product_id":"prod-1","order_amount":49.99}"#;

    c.bench_function("event_from_json", |b| {
        b.iter(|| {
            let event = Event::from_json_slice(black_box(body)).unwrap();
            black_box(event);
        })
    });
}

fn benchmark_batch_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_commit");

    for size in [1usize, 100, 1000] {
        let batch: Vec<Event> = (0..size)
            .map(|i| {
                Event::new(EventType::Purchase, Utc::now())
                    .with_product(format!("prod-{}", i % 50))
                    .with_amount(10.0 + i as f64)
            })
            .collect();

        let conn = rusqlite::Connection::open_in_memory().unwrap();
        create_database(&conn, SchemaOptions::default()).unwrap();
        let committer = SqliteCommitter::new(conn);

        group.bench_with_input(BenchmarkId::from_parameter(size), &batch, |b, batch| {
            b.iter(|| committer.commit(black_box(batch)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_queue_operations,
    benchmark_event_decode,
    benchmark_batch_commit
);
criterion_main!(benches);
