//! Relay latency benchmarks for Chorus.
//!
//! A frame goes in through one in-memory connection's session and comes out
//! of another's, covering decode, dispatch, store and delivery.

use chorus_bench::hub;
use chorus_core::run_session;
use chorus_transport::memory::{self, MemoryPeer};
use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

async fn session(hub: &Arc<chorus_core::Hub>, user_id: &str) -> MemoryPeer {
    let (sink, source, mut peer) = memory::pair(format!("conn-{user_id}"));
    tokio::spawn(run_session(Arc::clone(hub), Arc::new(sink), source));
    peer.send_text(json!({"type": "new-user-add", "userId": user_id}).to_string());
    peer.recv().await;
    peer
}

fn bench_relay(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("relay");

    let frame = |kind: &str, data: serde_json::Value| {
        json!({"type": kind, "userId": "alice", "data": data}).to_string()
    };
    let message = frame(
        "send-message",
        json!({
            "receiverId": "bob",
            "chatId": "chat-1",
            "senderId": "alice",
            "text": "hello there",
            "createdAt": "2024-05-01T12:00:00Z",
        }),
    );
    let signal = frame(
        "agora-signal",
        json!({"action": "ice-candidate", "targetId": "bob", "candidate": {"sdpMid": "0"}}),
    );

    for (name, frame) in [("send_message", message), ("signal", signal)] {
        group.bench_function(name, |b| {
            b.iter_custom(|iters| {
                rt.block_on(async {
                    let hub = hub();
                    let alice = session(&hub, "alice").await;
                    let mut bob = session(&hub, "bob").await;
                    bob.drain();

                    let start = Instant::now();
                    for _ in 0..iters {
                        alice.send_text(frame.clone());
                        bob.recv().await;
                    }
                    start.elapsed()
                })
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_relay);
criterion_main!(benches);
