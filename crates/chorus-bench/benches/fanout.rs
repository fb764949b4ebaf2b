//! Fan-out and registry benchmarks for Chorus.
//!
//! All connections are in-memory, so these measure the hub itself.

use chorus_bench::{drain, hub, register_all, user_ids};
use chorus_core::Registry;
use chorus_protocol::OutboundEvent;
use chorus_transport::memory;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Benchmark registry operations.
fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");

    group.bench_function("register_remove", |b| {
        let registry = Registry::new();
        let (sink, _source, _peer) = memory::pair("conn-1");
        let handle: chorus_core::Handle = Arc::new(sink);
        b.iter(|| {
            registry.register(black_box("alice"), Arc::clone(&handle));
            registry.remove(black_box("alice"))
        });
    });

    for size in [100, 10_000] {
        let hub = hub();
        let _peers = register_all(&hub, &user_ids(size));

        group.bench_with_input(BenchmarkId::new("lookup", size), &size, |b, _| {
            b.iter(|| hub.registry().lookup(black_box("user-42")))
        });
        group.bench_with_input(BenchmarkId::new("snapshot", size), &size, |b, _| {
            b.iter(|| hub.registry().snapshot())
        });
    }

    group.finish();
}

/// Benchmark follower fan-out, half the followers offline.
fn bench_fanout(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("fanout");

    for followers in [10, 100, 1000] {
        let hub = hub();
        let all = user_ids(followers);
        let mut peers = register_all(&hub, &all[..followers / 2]);
        let event = OutboundEvent::new_post(json!({"id": 1, "body": "x".repeat(128)}));

        group.throughput(Throughput::Elements(followers as u64));
        group.bench_with_input(
            BenchmarkId::new("post_created", followers),
            &followers,
            |b, _| {
                b.iter_custom(|iters| {
                    let mut elapsed = Duration::ZERO;
                    for _ in 0..iters {
                        let start = Instant::now();
                        rt.block_on(hub.broadcast_to_set(&all, &event));
                        elapsed += start.elapsed();
                        drain(&mut peers);
                    }
                    elapsed
                });
            },
        );
    }

    group.finish();
}

/// Benchmark the full-set presence broadcast.
fn bench_presence(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("presence");
    group.sample_size(20);

    for online in [10, 100, 500] {
        let hub = hub();
        let mut peers = register_all(&hub, &user_ids(online));

        group.bench_with_input(BenchmarkId::new("broadcast", online), &online, |b, _| {
            b.iter_custom(|iters| {
                let mut elapsed = Duration::ZERO;
                for _ in 0..iters {
                    let start = Instant::now();
                    rt.block_on(hub.broadcast_presence());
                    elapsed += start.elapsed();
                    drain(&mut peers);
                }
                elapsed
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_registry, bench_fanout, bench_presence);
criterion_main!(benches);
