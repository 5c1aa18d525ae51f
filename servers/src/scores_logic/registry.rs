//! Live connection set and best-effort fan-out.
//!
//! The registry owns one bounded channel sender per stream client; the
//! WebSocket task owns the matching receiver and forwards frames to the
//! socket. Delivery into a channel is bounded by a per-connection timeout,
//! so one stalled client cannot hold up a broadcast, and any connection that
//! fails or times out is removed before the broadcast returns. A connection
//! registered while a broadcast is running catches the next cycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

/// Frames are pre-encoded once per broadcast and shared between connections.
pub type Frame = Arc<String>;

const CHANNEL_CAPACITY: usize = 32;

pub struct ConnectionRegistry {
    senders: Mutex<HashMap<u64, mpsc::Sender<Frame>>>,
    send_timeout: Duration,
    channel_capacity: usize,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new(send_timeout: Duration) -> Self {
        Self::with_capacity(send_timeout, CHANNEL_CAPACITY)
    }

    pub fn with_capacity(send_timeout: Duration, channel_capacity: usize) -> Self {
        Self {
            senders: Mutex::new(HashMap::new()),
            send_timeout,
            channel_capacity,
            next_id: AtomicU64::new(1),
        }
    }

    /// Adds a connection to the live set. The returned receiver is the
    /// connection's frame feed; dropping it marks the connection dead and the
    /// next broadcast cleans it up.
    pub async fn register(&self) -> (u64, mpsc::Receiver<Frame>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        self.senders.lock().await.insert(id, tx);
        (id, rx)
    }

    /// Removes a connection. No-op when the id is already gone (a failed
    /// broadcast delivery may have removed it first).
    pub async fn unregister(&self, id: u64) {
        self.senders.lock().await.remove(&id);
    }

    /// Delivers `frame` to every connection registered at the start of the
    /// call and returns the number of successful deliveries. Failed or
    /// timed-out connections are unregistered before returning.
    pub async fn broadcast(&self, frame: Frame) -> usize {
        let targets: Vec<(u64, mpsc::Sender<Frame>)> = {
            let senders = self.senders.lock().await;
            senders.iter().map(|(id, tx)| (*id, tx.clone())).collect()
        };

        let send_timeout = self.send_timeout;
        let attempts = targets.into_iter().map(|(id, tx)| {
            let frame = frame.clone();
            async move {
                let ok = matches!(timeout(send_timeout, tx.send(frame)).await, Ok(Ok(())));
                (id, ok)
            }
        });
        let outcomes = futures_util::future::join_all(attempts).await;

        let mut delivered = 0;
        let dead: Vec<u64> = outcomes
            .into_iter()
            .filter_map(|(id, ok)| {
                if ok {
                    delivered += 1;
                    None
                } else {
                    Some(id)
                }
            })
            .collect();

        if !dead.is_empty() {
            let mut senders = self.senders.lock().await;
            for id in dead {
                senders.remove(&id);
                log::info!("Client {} removed after failed delivery", id);
            }
        }

        delivered
    }

    pub async fn len(&self) -> usize {
        self.senders.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(text: &str) -> Frame {
        Arc::new(text.to_owned())
    }

    #[tokio::test]
    async fn broadcast_reaches_every_live_connection_once() {
        let registry = ConnectionRegistry::new(Duration::from_secs(1));
        let (_id_a, mut rx_a) = registry.register().await;
        let (_id_b, mut rx_b) = registry.register().await;

        let delivered = registry.broadcast(frame("tick-1")).await;
        assert_eq!(delivered, 2);

        assert_eq!(rx_a.recv().await.unwrap().as_str(), "tick-1");
        assert_eq!(rx_b.recv().await.unwrap().as_str(), "tick-1");
        assert!(rx_a.try_recv().is_err(), "exactly one copy per broadcast");
    }

    #[tokio::test]
    async fn dead_connection_is_removed_and_skipped_afterwards() {
        let registry = ConnectionRegistry::new(Duration::from_secs(1));
        let (_id_a, mut rx_a) = registry.register().await;
        let (_id_b, rx_b) = registry.register().await;
        drop(rx_b); // client went away

        let delivered = registry.broadcast(frame("tick-1")).await;
        assert_eq!(delivered, 1);
        assert_eq!(registry.len().await, 1);

        let delivered = registry.broadcast(frame("tick-2")).await;
        assert_eq!(delivered, 1);
        assert_eq!(rx_a.recv().await.unwrap().as_str(), "tick-1");
        assert_eq!(rx_a.recv().await.unwrap().as_str(), "tick-2");
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_connection_times_out_and_is_removed() {
        let registry = ConnectionRegistry::with_capacity(Duration::from_secs(2), 1);
        let (_id, _rx) = registry.register().await;

        // Fill the connection's buffer without draining it.
        assert_eq!(registry.broadcast(frame("tick-1")).await, 1);

        // The next delivery cannot complete and must not block past the
        // timeout; the connection is evicted instead.
        assert_eq!(registry.broadcast(frame("tick-2")).await, 0);
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn unregister_shrinks_membership_by_exactly_one() {
        let registry = ConnectionRegistry::new(Duration::from_secs(1));
        let (id_a, _rx_a) = registry.register().await;
        let (_id_b, _rx_b) = registry.register().await;
        assert_eq!(registry.len().await, 2);

        registry.unregister(id_a).await;
        assert_eq!(registry.len().await, 1);

        // Unregistering an absent connection is a no-op.
        registry.unregister(id_a).await;
        assert_eq!(registry.len().await, 1);
    }
}
