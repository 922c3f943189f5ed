use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration;
use tracing::info;

use crate::cache::ttl_cache::TtlCache;
use crate::helpers::time::Clock;

/// Single-flight cache for one remote resource kept for a fixed TTL.
///
/// Errors keep their transient tag, so callers can tell a retryable outage
/// from a malformed response.
#[derive(Debug, Clone)]
pub struct RemoteResourceCache<V> {
    cache: TtlCache<&'static str, V>,
    key: &'static str,
    ttl: Duration,
}

impl<V: Clone> RemoteResourceCache<V> {
    pub fn new(key: &'static str, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { cache: TtlCache::with_clock(key, 1, clock), key, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached value, or the result of `fetch`, run at most once at a time.
    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let ttl = self.ttl;
        let key = self.key;
        self.cache
            .get_or_create(key, || async move {
                let value = fetch().await?;
                info!(resource = key, ttl_seconds = ttl.num_seconds(), "fetched remote resource");
                Ok((value, ttl))
            })
            .await
            .with_context(|| format!("could not load {key}"))
    }

    /// Drops the cached value so the next call fetches again.
    pub fn invalidate(&self) {
        self.cache.remove(&self.key);
    }
}
