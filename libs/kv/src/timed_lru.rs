//! A process-wide, read-write-locked map with per-entry TTL.
//!
//! Used for the DNS cache (spec.md §4.1 "DNS resolution", 5-minute TTL) and the
//! in-process certificate map (spec.md §4.2, populated on demand from the KV/Secret
//! cascade). Grounded on `crate::cache::{Cached, TimedLru}` referenced throughout
//! `proxy/src/control_plane/provider/mod.rs`.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// A cached value together with the instant it was fetched, so callers can tell a fresh
/// hit from a reload.
pub struct Cached<V> {
    pub value: V,
    pub cached: bool,
}

pub struct TimedLru<K, V> {
    ttl: Duration,
    inner: RwLock<HashMap<K, Entry<V>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> TimedLru<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, inner: RwLock::new(HashMap::new()) }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let guard = self.inner.read();
        match guard.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            _ => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let expires_at = Instant::now() + self.ttl;
        self.inner.write().insert(key, Entry { value, expires_at });
    }

    pub fn remove(&self, key: &K) {
        self.inner.write().remove(key);
    }

    /// Returns a cached value if still fresh, otherwise computes one with `fetch`,
    /// inserts it, and returns it. `fetch` may fail; on failure nothing is cached.
    pub async fn get_or_fetch<F, Fut, E>(self: &Arc<Self>, key: K, fetch: F) -> Result<Cached<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(Cached { value, cached: true });
        }
        let value = fetch().await?;
        self.insert(key, value.clone());
        Ok(Cached { value, cached: false })
    }

    /// Drops every entry whose TTL has elapsed. Intended to be driven by a background
    /// sweeper firing every `ttl / 2` (spec.md §4.1 "A background task sweeps expired
    /// entries every TTL/2").
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        self.inner.write().retain(|_, entry| entry.expires_at > now);
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Spawns a background task that calls [`TimedLru::sweep_expired`] every `ttl / 2`
/// until `cancel` fires.
pub fn spawn_sweeper<K, V>(cache: Arc<TimedLru<K, V>>, cancel: tokio_util::sync::CancellationToken)
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let interval = (cache.ttl() / 2).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => cache.sweep_expired(),
                _ = cancel.cancelled() => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expired_entries_are_not_returned() {
        let cache: TimedLru<&str, u32> = TimedLru::new(Duration::from_millis(10));
        cache.insert("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get(&"a"), None);
    }

    #[tokio::test]
    async fn get_or_fetch_only_calls_fetch_once_while_fresh() {
        let cache = Arc::new(TimedLru::<&str, u32>::new(Duration::from_secs(60)));
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        for _ in 0..3 {
            let calls = calls.clone();
            let result: Result<Cached<u32>, std::convert::Infallible> = cache
                .get_or_fetch("k", || async move {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(42)
                })
                .await;
            assert_eq!(result.unwrap().value, 42);
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn sweep_expired_removes_only_stale_entries() {
        let cache: TimedLru<&str, u32> = TimedLru::new(Duration::from_millis(10));
        cache.insert("a", 1);
        std::thread::sleep(Duration::from_millis(20));
        cache.insert("b", 2);
        cache.sweep_expired();
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(2));
    }
}
