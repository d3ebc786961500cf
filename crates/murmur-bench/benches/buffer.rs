//! Benchmarks for the Murmur message buffer.
//!
//! Covers the three hot operations: publish fan-out to pending waiters,
//! cursor catch-up from the replay window, and waiter registration/cancel.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use murmur_bench::filled_buffer;
use murmur_core::{Message, MessageBuffer};
use std::time::Instant;

/// Benchmark publishing into a full cache with no readers (append + evict).
fn bench_publish_evict(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_evict");
    group.throughput(Throughput::Elements(1));

    for cache_size in [10, 200, 10_000] {
        let buffer = filled_buffer(cache_size, cache_size);
        group.bench_with_input(
            BenchmarkId::from_parameter(cache_size),
            &cache_size,
            |b, _| b.iter(|| buffer.publish_one(Message::new(black_box("hello")))),
        );
    }

    group.finish();
}

/// Benchmark resolving N pending waiters with one publish.
fn bench_publish_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_fanout");

    for waiters in [1, 10, 100, 1_000] {
        group.throughput(Throughput::Elements(waiters as u64));
        group.bench_with_input(BenchmarkId::from_parameter(waiters), &waiters, |b, &n| {
            b.iter_custom(|iters| {
                let buffer = MessageBuffer::new();
                let mut elapsed = std::time::Duration::ZERO;
                for _ in 0..iters {
                    let handles: Vec<_> = (0..n).map(|_| buffer.wait(None)).collect();
                    let start = Instant::now();
                    buffer.publish_one(Message::new("hello"));
                    elapsed += start.elapsed();
                    drop(handles);
                }
                elapsed
            });
        });
    }

    group.finish();
}

/// Benchmark cursor lookups at various depths of a full cache.
fn bench_catch_up(c: &mut Criterion) {
    let mut group = c.benchmark_group("catch_up");
    let buffer = filled_buffer(200, 200);

    for behind in [0, 10, 199] {
        let cursor = format!("m{}", 199 - behind);
        group.bench_with_input(BenchmarkId::new("behind", behind), &cursor, |b, cursor| {
            b.iter(|| buffer.wait(Some(black_box(cursor.as_str()))))
        });
    }

    group.bench_function("stale_cursor", |b| {
        b.iter(|| {
            let handle = buffer.wait(Some(black_box("evicted")));
            buffer.cancel(&handle)
        })
    });

    group.finish();
}

/// Benchmark end-to-end delivery: register, publish, await.
fn bench_delivery_latency(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");
    let buffer = MessageBuffer::new();

    c.bench_function("delivery_latency", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let handle = buffer.wait(None);
                buffer.publish_one(Message::new("hello"));
                handle.await
            })
        })
    });
}

criterion_group!(
    benches,
    bench_publish_evict,
    bench_publish_fanout,
    bench_catch_up,
    bench_delivery_latency,
);
criterion_main!(benches);
