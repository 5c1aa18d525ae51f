//! The service object handed to every handler and background task.
//!
//! One `AppState` is built at startup and cloned wherever it is needed; all
//! clones share the same cache, limiter and registry. Nothing here is global.

use std::sync::Arc;
use std::time::Duration;

use lib_scores::{
    DataProvider, FeedKey, FeedPayload, FeedResponse, FetchError, FixedWindowLimiter, TtlCache,
};

use crate::scores_logic::config::Settings;
use crate::scores_logic::registry::ConnectionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<FixedWindowLimiter>,
    pub registry: Arc<ConnectionRegistry>,
    cache: TtlCache<FeedPayload>,
    provider: Arc<dyn DataProvider>,
    cache_ttl: Duration,
}

impl AppState {
    pub fn new(settings: &Settings, provider: Arc<dyn DataProvider>) -> Self {
        Self {
            limiter: Arc::new(FixedWindowLimiter::new(
                settings.rate_window,
                settings.rate_max_requests,
            )),
            registry: Arc::new(ConnectionRegistry::new(settings.send_timeout)),
            cache: TtlCache::new(),
            provider,
            cache_ttl: settings.cache_ttl,
        }
    }

    /// Serves a feed through the cache, reaching the provider only on a miss.
    pub async fn fetch_feed(&self, key: FeedKey) -> Result<FeedResponse, FetchError> {
        let cache_key = key.to_string();
        let provider = Arc::clone(&self.provider);
        let lookup = self
            .cache
            .get_or_compute(&cache_key, self.cache_ttl, move || provider.fetch(key))
            .await?;
        Ok(FeedResponse {
            data: lookup.value,
            source: lookup.source,
        })
    }
}
