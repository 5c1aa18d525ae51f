//! Periodic broadcast driver.
//!
//! Independent of the request lifecycle: one task, started at process
//! startup, that refreshes the live feed through the cache every tick and
//! fans the frame out to the registry. Ticks with zero connections still run
//! so the cache stays warm for pull clients. The task exits when the process
//! shutdown signal arrives.

use std::sync::Arc;

use lib_scores::FeedKey;
use tokio::sync::broadcast;
use tokio::time::interval;

use crate::scores_logic::config::Settings;
use crate::scores_logic::state::AppState;

pub async fn run(settings: Settings, state: AppState, mut shutdown: broadcast::Receiver<()>) {
    let mut tick = interval(settings.broadcast_interval);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                log::info!("Broadcast driver received shutdown signal.");
                break;
            }
            _ = tick.tick() => {
                state.limiter.sweep_stale().await;

                match state.fetch_feed(FeedKey::LiveScores).await {
                    Ok(response) => match serde_json::to_string(&response) {
                        Ok(encoded) => {
                            let delivered = state.registry.broadcast(Arc::new(encoded)).await;
                            log::debug!("Broadcast tick delivered to {} clients", delivered);
                        }
                        Err(e) => log::error!("Failed to encode broadcast frame: {}", e),
                    },
                    // Routine upstream trouble: skip this cycle's fan-out,
                    // the next tick retries through the cache.
                    Err(e) => log::warn!("Skipping broadcast tick, provider error: {}", e),
                }
            }
        }
    }
}
