//! Response memoization for the discovery endpoints. Identical inputs
//! produce byte-identical responses, so a fingerprint lookup can stand in
//! for a full rebuild.

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hit: u64,
    pub miss: u64,
    pub size: usize,
}

/// Fingerprint-keyed store of serialized responses. Concurrent misses on the
/// same fingerprint are funneled through a per-key gate so at most one build
/// runs at a time; followers find the entry populated and count as hits.
#[derive(Default)]
pub struct ResponseCache {
    entries: RwLock<HashMap<String, Bytes>>,
    building: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    hit: AtomicU64,
    miss: AtomicU64,
}

impl ResponseCache {
    pub async fn get_or_build<F, Fut, E>(&self, key: &str, build: F) -> Result<Bytes, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, E>>,
    {
        if let Some(found) = self.entries.read().await.get(key) {
            self.hit.fetch_add(1, Ordering::Relaxed);
            return Ok(found.clone());
        }

        let gate = {
            let mut building = self.building.lock().await;
            Arc::clone(building.entry(key.to_owned()).or_default())
        };
        let _guard = gate.lock().await;

        // a concurrent builder may have landed the entry while this request
        // waited on the gate
        if let Some(found) = self.entries.read().await.get(key) {
            self.hit.fetch_add(1, Ordering::Relaxed);
            return Ok(found.clone());
        }

        self.miss.fetch_add(1, Ordering::Relaxed);
        let result = build().await;
        if let Ok(bytes) = &result {
            self.entries.write().await.insert(key.to_owned(), bytes.clone());
        }
        self.building.lock().await.remove(key);
        result
    }

    /// Flushes every entry. Counters are left untouched.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Zeroes the counters. Entries are left untouched.
    pub fn reset_stats(&self) {
        self.hit.store(0, Ordering::Relaxed);
        self.miss.store(0, Ordering::Relaxed);
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hit: self.hit.load(Ordering::Relaxed),
            miss: self.miss.load(Ordering::Relaxed),
            size: self.entries.read().await.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ok_build(payload: &'static str) -> Result<Bytes, ()> {
        Ok(Bytes::from_static(payload.as_bytes()))
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let cache = ResponseCache::default();
        let first = cache.get_or_build("k", || ok_build("payload")).await.unwrap();
        let second = cache.get_or_build("k", || ok_build("other")).await.unwrap();
        assert_eq!(first, second);

        let stats = cache.stats().await;
        assert_eq!(stats, CacheStats { hit: 1, miss: 1, size: 1 });
    }

    #[tokio::test]
    async fn failed_builds_do_not_populate() {
        let cache = ResponseCache::default();
        let result: Result<Bytes, &str> = cache.get_or_build("k", || async { Err("registry down") }).await;
        assert!(result.is_err());
        assert_eq!(cache.stats().await, CacheStats { hit: 0, miss: 1, size: 0 });

        let recovered = cache.get_or_build("k", || ok_build("payload")).await.unwrap();
        assert_eq!(recovered, Bytes::from_static(b"payload"));
        assert_eq!(cache.stats().await, CacheStats { hit: 0, miss: 2, size: 1 });
    }

    #[tokio::test]
    async fn clear_preserves_stats_and_reset_preserves_entries() {
        let cache = ResponseCache::default();
        cache.get_or_build("k", || ok_build("payload")).await.unwrap();
        cache.clear().await;
        assert_eq!(cache.stats().await, CacheStats { hit: 0, miss: 1, size: 0 });

        cache.get_or_build("k", || ok_build("payload")).await.unwrap();
        cache.reset_stats();
        assert_eq!(cache.stats().await, CacheStats { hit: 0, miss: 0, size: 1 });
    }

    #[tokio::test]
    async fn concurrent_misses_build_once() {
        let cache = Arc::new(ResponseCache::default());
        let builds = Arc::new(AtomicU64::new(0));

        let tasks = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let builds = Arc::clone(&builds);
                tokio::spawn(async move {
                    cache
                        .get_or_build("k", || async {
                            builds.fetch_add(1, Ordering::Relaxed);
                            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                            Ok::<_, ()>(Bytes::from_static(b"payload"))
                        })
                        .await
                })
            })
            .collect::<Vec<_>>();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(builds.load(Ordering::Relaxed), 1);
        let stats = cache.stats().await;
        assert_eq!(stats.miss, 1);
        assert_eq!(stats.hit, 7);
    }
}
