//! TTL cache with single-flight stampede protection.
//!
//! The cache shields a slow, rate-limited upstream: a live entry is served
//! without touching the upstream at all, and when an entry is missing or
//! expired, concurrent callers for the same key share exactly one fetch.
//!
//! ## Design
//!
//! Two tables live behind one mutex: the entry table and the in-flight table.
//! The lock is only ever held for map operations, never across a fetch, so
//! callers of unrelated keys do not contend. The first caller to miss becomes
//! the leader: it registers a `watch` channel in the in-flight table and runs
//! the fetch on a detached task, so a leader whose request is cancelled
//! mid-fetch cannot strand the waiters. Everyone on the miss path, leader
//! included, awaits the channel and receives the shared outcome.
//!
//! Expiry is passive: entries are checked against their deadline on read and
//! overwritten by the next successful fetch. Failures are never stored, so a
//! failed fetch does not poison the key; the next call simply retries.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

use crate::provider::FetchError;

/// Where a returned value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Served from a live cache entry; the upstream was not consulted.
    Cache,
    /// Freshly fetched (or shared with the fetch that was already in flight).
    Origin,
}

/// A cache lookup result: the value plus where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup<V> {
    pub value: V,
    pub source: Source,
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

type Outcome<V> = Result<V, FetchError>;

struct Tables<V> {
    entries: HashMap<String, Entry<V>>,
    inflight: HashMap<String, watch::Receiver<Option<Outcome<V>>>>,
}

/// Shared TTL cache. Cloning is cheap and clones observe the same tables.
pub struct TtlCache<V> {
    tables: Arc<Mutex<Tables<V>>>,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            tables: Arc::clone(&self.tables),
        }
    }
}

impl<V> Default for TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables {
                entries: HashMap::new(),
                inflight: HashMap::new(),
            })),
        }
    }

    /// Returns the live entry for `key`, or computes one via `fetch`.
    ///
    /// Concurrent callers that miss on the same key all suspend on the single
    /// in-flight fetch and receive its outcome, success or failure alike.
    /// Values are cloned out; callers never hold a reference into the cache.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<Lookup<V>, FetchError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Outcome<V>> + Send + 'static,
    {
        let mut rx = {
            let mut tables = self.tables.lock().await;

            if let Some(entry) = tables.entries.get(key) {
                if entry.expires_at > Instant::now() {
                    return Ok(Lookup {
                        value: entry.value.clone(),
                        source: Source::Cache,
                    });
                }
            }

            match tables.inflight.get(key) {
                Some(rx) => rx.clone(),
                None => {
                    let (tx, rx) = watch::channel(None);
                    tables.inflight.insert(key.to_owned(), rx.clone());
                    drop(tables);

                    let tables = Arc::clone(&self.tables);
                    let key = key.to_owned();
                    tokio::spawn(async move {
                        let outcome = fetch().await;

                        let mut tables = tables.lock().await;
                        tables.inflight.remove(&key);
                        match &outcome {
                            Ok(value) => {
                                tables.entries.insert(
                                    key,
                                    Entry {
                                        value: value.clone(),
                                        expires_at: Instant::now() + ttl,
                                    },
                                );
                            }
                            Err(err) => {
                                log::debug!("fetch for '{key}' failed, not cached: {err}");
                            }
                        }
                        drop(tables);

                        // Waiters may all be gone already; that is fine.
                        let _ = tx.send(Some(outcome));
                    });

                    rx
                }
            }
        };

        let result = match rx.wait_for(|slot| slot.is_some()).await {
            Ok(slot) => match slot.as_ref() {
                Some(outcome) => outcome.clone().map(|value| Lookup {
                    value,
                    source: Source::Origin,
                }),
                None => Err(FetchError::Aborted),
            },
            // The fetch task dropped the sender without publishing, which
            // only happens if the fetch future panicked.
            Err(_) => Err(FetchError::Aborted),
        };
        result
    }

    /// Number of stored entries, expired ones included (expiry is passive).
    pub async fn len(&self) -> usize {
        self.tables.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tables.lock().await.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TTL: Duration = Duration::from_secs(30);

    fn counting_fetch(
        calls: &Arc<AtomicUsize>,
        value: &str,
    ) -> impl FnOnce() -> futures_util::future::Ready<Outcome<String>> + Send + 'static {
        let calls = Arc::clone(calls);
        let value = value.to_owned();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            futures_util::future::ready(Ok(value))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn live_entry_served_without_fetch() {
        let cache = TtlCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache
            .get_or_compute("live_scores", TTL, counting_fetch(&calls, "v1"))
            .await
            .unwrap();
        assert_eq!(first.value, "v1");
        assert_eq!(first.source, Source::Origin);

        tokio::time::advance(TTL - Duration::from_secs(1)).await;

        let second = cache
            .get_or_compute("live_scores", TTL, counting_fetch(&calls, "v2"))
            .await
            .unwrap();
        assert_eq!(second.value, "v1");
        assert_eq!(second.source, Source::Cache);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_recomputed() {
        let cache = TtlCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_compute("live_scores", TTL, counting_fetch(&calls, "v1"))
            .await
            .unwrap();

        tokio::time::advance(TTL + Duration::from_millis(1)).await;

        let refreshed = cache
            .get_or_compute("live_scores", TTL, counting_fetch(&calls, "v2"))
            .await
            .unwrap();
        assert_eq!(refreshed.value, "v2");
        assert_eq!(refreshed.source, Source::Origin);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_share_one_fetch() {
        let cache: TtlCache<String> = TtlCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("live_scores", TTL, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok("v2".to_owned())
                    })
                    .await
            }));
        }

        for handle in handles {
            let lookup = handle.await.unwrap().unwrap();
            assert_eq!(lookup.value, "v2");
            assert_eq!(lookup.source, Source::Origin);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_propagate_and_are_not_cached() {
        let cache: TtlCache<String> = TtlCache::new();

        let err = cache
            .get_or_compute("live_scores", TTL, || async {
                Err(FetchError::Upstream("boom".to_owned()))
            })
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Upstream("boom".to_owned()));
        assert!(cache.is_empty().await);

        // The failed attempt must not poison the key.
        let retry = cache
            .get_or_compute("live_scores", TTL, || async { Ok("v1".to_owned()) })
            .await
            .unwrap();
        assert_eq!(retry.value, "v1");
        assert_eq!(retry.source, Source::Origin);
    }

    #[tokio::test(start_paused = true)]
    async fn unrelated_keys_do_not_wait_on_each_other() {
        let cache: TtlCache<String> = TtlCache::new();

        // A fetch for one key that never finishes within the test horizon.
        let stuck = cache.clone();
        tokio::spawn(async move {
            let _ = stuck
                .get_or_compute("player_stats:23", TTL, || async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok("slow".to_owned())
                })
                .await;
        });
        tokio::task::yield_now().await;

        let lookup = cache
            .get_or_compute("team_rankings", TTL, || async { Ok("fast".to_owned()) })
            .await
            .unwrap();
        assert_eq!(lookup.value, "fast");
    }

    /// TTL=30s, v1 fetched at t=0: a hit at t=5, then ten concurrent callers
    /// at t=31 trigger exactly one fetch of v2 and all observe v2.
    #[tokio::test(start_paused = true)]
    async fn refresh_after_expiry_end_to_end() {
        let cache: TtlCache<String> = TtlCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_compute("live_scores", TTL, counting_fetch(&calls, "v1"))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        let hit = cache
            .get_or_compute("live_scores", TTL, counting_fetch(&calls, "v2"))
            .await
            .unwrap();
        assert_eq!((hit.value.as_str(), hit.source), ("v1", Source::Cache));

        tokio::time::advance(Duration::from_secs(26)).await;
        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("live_scores", TTL, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok("v2".to_owned())
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().value, "v2");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
