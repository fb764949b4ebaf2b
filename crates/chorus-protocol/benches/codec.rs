//! Codec benchmarks for chorus-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use chorus_protocol::{codec, OutboundEvent};
use serde_json::json;

fn bench_encode_presence(c: &mut Criterion) {
    let users: Vec<String> = (0..1000).map(|i| format!("user-{i}")).collect();
    let event = OutboundEvent::presence(&users);

    let mut group = c.benchmark_group("encode");
    group.bench_function("presence_1000", |b| {
        b.iter(|| codec::encode(black_box(&event)))
    });
    group.finish();
}

fn bench_decode_message(c: &mut Criterion) {
    let frame = serde_json::to_vec(&json!({
        "type": "send-message",
        "userId": "alice",
        "data": {
            "receiverId": "bob",
            "chatId": "3f1c2a9e-0000-4000-8000-000000000000",
            "senderId": "alice",
            "text": "x".repeat(256),
            "createdAt": "2024-05-01T12:00:00Z"
        }
    }))
    .unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(frame.len() as u64));
    group.bench_function("send_message_256B", |b| {
        b.iter(|| codec::decode(black_box(&frame)))
    });
    group.finish();
}

fn bench_decode_fanout(c: &mut Criterion) {
    let followers: Vec<String> = (0..500).map(|i| format!("user-{i}")).collect();
    let frame = serde_json::to_vec(&json!({
        "type": "post-created",
        "userId": "alice",
        "data": {"followers": followers, "post": {"id": 1, "body": "hello"}}
    }))
    .unwrap();

    c.bench_function("decode_post_created_500", |b| {
        b.iter(|| codec::decode(black_box(&frame)).unwrap())
    });
}

criterion_group!(
    benches,
    bench_encode_presence,
    bench_decode_message,
    bench_decode_fanout
);
criterion_main!(benches);
