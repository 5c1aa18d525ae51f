//! Per-client fixed-window request limiter.
//!
//! One counter per client identity (the servers use the peer IP). The counter
//! resets whenever its window has fully elapsed, so a client that crosses the
//! threshold is throttled for the remainder of the current window and admitted
//! again in the next one, never locked out permanently. Rejection is a plain
//! `false`; the caller decides what the client sees (an HTTP 429, a refused
//! stream subscription).

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

struct Counter {
    count: u32,
    window_start: Instant,
}

/// Fixed-window limiter shared by every request handler.
pub struct FixedWindowLimiter {
    window: Duration,
    threshold: u32,
    counters: Mutex<HashMap<String, Counter>>,
}

impl FixedWindowLimiter {
    pub fn new(window: Duration, threshold: u32) -> Self {
        Self {
            window,
            threshold,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Counts one request for `client_key` and says whether to admit it.
    ///
    /// The first request of a window (or of a new client) opens a fresh
    /// window with `count = 1`. Within a window, requests are admitted while
    /// the counter stays at or below the threshold.
    pub async fn admit(&self, client_key: &str) -> bool {
        let now = Instant::now();
        let mut counters = self.counters.lock().await;

        match counters.get_mut(client_key) {
            Some(counter) if now.duration_since(counter.window_start) < self.window => {
                counter.count = counter.count.saturating_add(1);
                counter.count <= self.threshold
            }
            _ => {
                counters.insert(
                    client_key.to_owned(),
                    Counter {
                        count: 1,
                        window_start: now,
                    },
                );
                true
            }
        }
    }

    /// Drops counters whose window elapsed a full window ago, so the table
    /// does not grow with every client address ever seen. Safe to call from
    /// any periodic task; a dropped counter is equivalent to an expired one.
    pub async fn sweep_stale(&self) {
        let now = Instant::now();
        let horizon = self.window * 2;
        self.counters
            .lock()
            .await
            .retain(|_, counter| now.duration_since(counter.window_start) < horizon);
    }

    /// Number of clients currently tracked.
    pub async fn tracked_clients(&self) -> usize {
        self.counters.lock().await.len()
    }
}
