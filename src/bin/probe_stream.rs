//! Probe: whale tracker WebSocket stream
//!
//! Connects to a running kalshi-whale instance and:
//! - Prints the type and size of every message received
//! - Checks that initial_data (when sent) arrives first
//! - Listens for a bounded time, then closes cleanly

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser)]
#[command(name = "probe_stream", about = "Print messages from the whale tracker stream")]
struct Args {
    /// WebSocket URL of the running service
    #[arg(long, default_value = "ws://127.0.0.1:8001/ws")]
    url: String,

    /// Seconds to listen before disconnecting
    #[arg(long, default_value_t = 70)]
    seconds: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    println!("=== Probe: whale stream ===");
    println!("URL: {}", args.url);
    println!();

    let (ws_stream, response) = connect_async(args.url.as_str()).await?;
    println!("Connected! Response status: {}", response.status());
    println!();

    let (mut write, mut read) = ws_stream.split();

    println!("--- Listening for {} seconds ---", args.seconds);
    let start = Instant::now();
    let timeout = Duration::from_secs(args.seconds);
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut first_type: Option<String> = None;

    loop {
        let remaining = timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(remaining, read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                let parsed: Value = serde_json::from_str(text.as_str()).unwrap_or(Value::Null);
                let kind = parsed
                    .get("type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                let count = parsed
                    .get("data")
                    .and_then(|d| d.get("count").or_else(|| d.get("connections")))
                    .cloned()
                    .unwrap_or(Value::Null);
                println!(
                    "[{:>6.1}s] {kind:<14} count/connections={count} bytes={}",
                    start.elapsed().as_secs_f64(),
                    text.len()
                );
                first_type.get_or_insert_with(|| kind.clone());
                *counts.entry(kind).or_default() += 1;
            }
            Ok(Some(Ok(Message::Close(frame)))) => {
                println!("Server closed the connection: {frame:?}");
                break;
            }
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(e))) => {
                println!("WebSocket error: {e}");
                break;
            }
            Ok(None) => {
                println!("Stream ended");
                break;
            }
            Err(_) => break,
        }
    }

    let _ = write.send(Message::Close(None)).await;
    println!();

    println!("--- Summary ---");
    println!("First message: {}", first_type.as_deref().unwrap_or("(none)"));
    for (kind, n) in &counts {
        println!("  {kind:<14} {n}");
    }
    if first_type.is_some_and(|t| t != "initial_data") {
        println!("  note: no initial_data first (service had no snapshot yet?)");
    }

    Ok(())
}
