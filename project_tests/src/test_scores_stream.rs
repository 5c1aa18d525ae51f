//! Manual live test: subscribe to a running server_scores instance and
//! report how many frames arrive per minute, per source tag.
//!
//! Run with: cargo run -p project_tests --bin test_scores_stream -- --url ws://127.0.0.1:9003/ws

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use clap::Parser;
use futures_util::StreamExt;
use lib_scores::{FeedResponse, Source};
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// WebSocket endpoint of a running server_scores instance
    #[clap(long, default_value = "ws://127.0.0.1:9003/ws")]
    url: String,

    /// Report interval in minutes
    #[clap(short, long, default_value_t = 1)]
    report_interval_minutes: u64,
}

struct Stats {
    timestamps: VecDeque<DateTime<Utc>>,
    total: u64,
    from_cache: u64,
    from_origin: u64,
    decode_failures: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let stats = Arc::new(Mutex::new(Stats {
        timestamps: VecDeque::new(),
        total: 0,
        from_cache: 0,
        from_origin: 0,
        decode_failures: 0,
    }));

    // Reporter task: frames-per-minute over a sliding window.
    let stats_reporter = Arc::clone(&stats);
    let report_interval_seconds = args.report_interval_minutes * 60;
    tokio::spawn(async move {
        loop {
            sleep(std::time::Duration::from_secs(report_interval_seconds)).await;
            let now = Utc::now();
            let one_minute_ago = now - ChronoDuration::minutes(1);

            let mut data = stats_reporter.lock().unwrap();
            while data
                .timestamps
                .front()
                .is_some_and(|&t| t < one_minute_ago)
            {
                data.timestamps.pop_front();
            }

            println!(
                "[{}] rate: {}/min | total: {} (cache: {}, origin: {}, undecodable: {})",
                now.format("%H:%M:%S"),
                data.timestamps.len(),
                data.total,
                data.from_cache,
                data.from_origin,
                data.decode_failures,
            );
        }
    });

    println!("Connecting to {}", args.url);
    let (ws_stream, _) = connect_async(args.url.as_str())
        .await
        .context("WebSocket connect failed")?;
    println!("Connected, waiting for frames...");

    let (_write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let mut data = stats.lock().unwrap();
                data.total += 1;
                data.timestamps.push_back(Utc::now());
                match serde_json::from_str::<FeedResponse>(&text) {
                    Ok(frame) => match frame.source {
                        Source::Cache => data.from_cache += 1,
                        Source::Origin => data.from_origin += 1,
                    },
                    Err(_) => data.decode_failures += 1,
                }
            }
            Ok(Message::Close(frame)) => {
                println!("Server closed the stream: {:?}", frame);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("Stream error: {}", e);
                break;
            }
        }
    }

    Ok(())
}
