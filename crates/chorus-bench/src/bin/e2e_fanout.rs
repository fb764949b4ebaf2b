//! End-to-end fan-out benchmark for Chorus.
//!
//! One publisher posts to N followers over real WebSocket connections and
//! every follower counts the `new-post` events it receives.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_followers = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(64);

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║            Chorus End-to-End Fan-out Benchmark               ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Make sure the server is running: cargo run --release        ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    if let Err(e) = run_fanout_benchmark(num_followers).await {
        eprintln!("Benchmark failed: {e}");
    }
}

async fn run_fanout_benchmark(num_followers: usize) -> Result<(), BoxError> {
    println!("📊 Fan-out Benchmark: 1 publisher, {num_followers} followers");
    println!("   Warmup: {WARMUP_SECS}s, Measurement: {BENCH_SECS}s");
    println!();

    let received = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_followers + 1));
    let followers: Vec<String> = (0..num_followers).map(|i| format!("bench-follower-{i}")).collect();

    let mut handles = Vec::new();
    for user_id in followers.clone() {
        let received = Arc::clone(&received);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            if let Err(e) = run_follower(&user_id, received, barrier).await {
                eprintln!("Follower {user_id} error: {e}");
            }
        }));
    }

    barrier.wait().await;
    println!("✓ All {num_followers} followers registered");

    let posts = Arc::new(AtomicU64::new(0));
    let publisher = tokio::spawn(run_publisher(followers, Arc::clone(&posts)));

    println!("⏳ Warming up for {WARMUP_SECS}s...");
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    received.store(0, Ordering::SeqCst);
    posts.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("📈 Measuring for {BENCH_SECS}s...");
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed().as_secs_f64();
    let total_received = received.load(Ordering::SeqCst);
    let total_posts = posts.load(Ordering::SeqCst);

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                         RESULTS                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Followers:            {:>10}                           ║", num_followers);
    println!("║  Duration:             {:>10.2}s                          ║", elapsed);
    println!("║  Posts Sent:           {:>10}                           ║", total_posts);
    println!("║  Events Delivered:     {:>10}                           ║", total_received);
    println!(
        "║  Posts/s:              {:>10.0}                           ║",
        total_posts as f64 / elapsed
    );
    println!(
        "║  Deliveries/s:         {:>10.0}                           ║",
        total_received as f64 / elapsed
    );
    println!("╚══════════════════════════════════════════════════════════════╝");

    publisher.abort();
    for handle in handles {
        handle.abort();
    }
    Ok(())
}

fn frame(kind: &str, user_id: &str, data: Value) -> Message {
    Message::Text(json!({ "type": kind, "userId": user_id, "data": data }).to_string())
}

async fn run_follower(
    user_id: &str,
    received: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    let (ws, _) = connect_async(SERVER_URL).await?;
    let (mut sender, mut receiver) = ws.split();

    sender.send(frame("new-user-add", user_id, json!({}))).await?;
    // The first presence update confirms registration.
    receiver.next().await;

    barrier.wait().await;

    while let Some(msg) = receiver.next().await {
        if let Message::Text(text) = msg? {
            if text.contains("\"new-post\"") {
                received.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    Ok(())
}

async fn run_publisher(followers: Vec<String>, posts: Arc<AtomicU64>) -> Result<(), BoxError> {
    let (ws, _) = connect_async(SERVER_URL).await?;
    let (mut sender, mut receiver) = ws.split();

    sender
        .send(frame("new-user-add", "bench-publisher", json!({})))
        .await?;

    // Presence updates arrive here too; keep them from backing up.
    let drain = tokio::spawn(async move { while receiver.next().await.is_some() {} });

    let post = frame(
        "post-created",
        "bench-publisher",
        json!({ "followers": followers, "post": { "id": 1, "body": "x".repeat(64) } }),
    );

    loop {
        if sender.send(post.clone()).await.is_err() {
            break;
        }
        posts.fetch_add(1, Ordering::Relaxed);
        tokio::task::yield_now().await;
    }

    drain.abort();
    Ok(())
}
