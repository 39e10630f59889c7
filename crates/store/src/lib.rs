//! kplane store: in-RAM TTL caches with lock-free reads and a background janitor.

#![forbid(unsafe_code)]

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use metrics::counter;
use rustc_hash::FxHashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct Entry<V> {
    value: Arc<V>,
    expires_at: Instant,
}

impl<V> Clone for Entry<V> {
    fn clone(&self) -> Self {
        Self { value: Arc::clone(&self.value), expires_at: self.expires_at }
    }
}

/// Key → value cache where every entry expires a fixed time after it was written.
///
/// Readers load the current map snapshot without locking; writers swap in a new map. Reads never
/// extend an entry's lifetime. Expired entries are invisible to `get` and removed by `evict_expired`.
pub struct TtlCache<K, V> {
    name: &'static str,
    ttl: Duration,
    map: ArcSwap<FxHashMap<K, Entry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self { name, ttl, map: ArcSwap::from_pointee(FxHashMap::default()) }
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let now = Instant::now();
        let hit = self.map.load().get(key).filter(|e| e.expires_at > now).map(|e| Arc::clone(&e.value));
        if hit.is_some() {
            counter!("kplane_cache_hits_total", 1u64, "cache" => self.name);
        } else {
            counter!("kplane_cache_misses_total", 1u64, "cache" => self.name);
        }
        hit
    }

    pub fn insert(&self, key: K, value: V) -> Arc<V> {
        let value = Arc::new(value);
        let entry = Entry { value: Arc::clone(&value), expires_at: Instant::now() + self.ttl };
        self.map.rcu(|cur| {
            let mut next = FxHashMap::clone(cur);
            next.insert(key.clone(), entry.clone());
            next
        });
        value
    }

    /// Drop expired entries; returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        if !self.map.load().values().any(|e| e.expires_at <= now) {
            return 0;
        }
        let mut removed = 0;
        self.map.rcu(|cur| {
            let next: FxHashMap<K, Entry<V>> =
                cur.iter().filter(|(_, e)| e.expires_at > now).map(|(k, e)| (k.clone(), e.clone())).collect();
            removed = cur.len() - next.len();
            next
        });
        removed
    }

    /// Entries currently stored, expired ones included until the next eviction.
    pub fn len(&self) -> usize { self.map.load().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Return the cached value or compute, store and return a fresh one. Errors are not cached.
    ///
    /// Concurrent misses on the same key may each compute; the last write wins.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: K, fetch: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(v) = self.get(&key) {
            return Ok(v);
        }
        let fresh = fetch().await?;
        debug!(cache = self.name, "cache: refreshed");
        Ok(self.insert(key, fresh))
    }
}

/// Something the janitor can sweep.
pub trait Sweep: Send + Sync {
    fn sweep(&self) -> usize;
    fn label(&self) -> &'static str;
}

impl<K, V> Sweep for TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Send + Sync,
{
    fn sweep(&self) -> usize { self.evict_expired() }

    fn label(&self) -> &'static str { self.name }
}

/// Spawn a task that evicts expired entries every `period` until `cancel` fires.
pub fn spawn_janitor(caches: Vec<Arc<dyn Sweep>>, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    for cache in &caches {
                        let removed = cache.sweep();
                        if removed > 0 {
                            debug!(cache = cache.label(), removed, "janitor: evicted");
                        }
                    }
                }
            }
        }
        info!("janitor stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl_and_hits_do_not_extend() {
        let c: TtlCache<&'static str, u32> = TtlCache::new("test", Duration::from_secs(60));
        c.insert("a", 1);
        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(c.get(&"a").as_deref(), Some(&1));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(c.get(&"a"), None);
        assert_eq!(c.len(), 1);
        assert_eq!(c.evict_expired(), 1);
        assert!(c.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_runs_once_within_ttl_and_errors_are_not_cached() {
        let c: TtlCache<u8, String> = TtlCache::new("test", Duration::from_secs(300));
        let mut calls = 0;
        let err: Result<Arc<String>, &str> = c.get_or_try_insert_with(1, || async { Err("boom") }).await;
        assert!(err.is_err());
        for _ in 0..3 {
            let v = c
                .get_or_try_insert_with(1, || {
                    calls += 1;
                    async { Ok::<_, &str>("v".to_string()) }
                })
                .await
                .unwrap();
            assert_eq!(v.as_str(), "v");
        }
        assert_eq!(calls, 1);
        tokio::time::advance(Duration::from_secs(301)).await;
        c.get_or_try_insert_with(1, || {
            calls += 1;
            async { Ok::<_, &str>("w".to_string()) }
        })
        .await
        .unwrap();
        assert_eq!(calls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn janitor_sweeps_until_cancelled() {
        let c = Arc::new(TtlCache::<u8, u8>::new("test", Duration::from_secs(1)));
        c.insert(1, 1);
        let cancel = CancellationToken::new();
        let handle = spawn_janitor(vec![c.clone() as Arc<dyn Sweep>], Duration::from_secs(5), cancel.clone());
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(c.is_empty());
        cancel.cancel();
        handle.await.unwrap();
    }
}
