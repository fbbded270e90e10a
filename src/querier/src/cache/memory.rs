use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use common::config::CacheConfig;
use common::model::Value;

use super::{Cache, CacheEntry, CacheError};

/// In-flight fetch of one key. Dropping `done` wakes every waiter.
struct Pending {
    id: u64,
    done: watch::Sender<()>,
}

struct Inner {
    config: CacheConfig,
    entries: DashMap<String, CacheEntry>,
    /// Guards registration, lookup and removal of in-flight fetches,
    /// including the removal the reaper does alongside an expired entry.
    pending: Mutex<HashMap<String, Pending>>,
    next_id: AtomicU64,
}

impl Inner {
    fn lock_pending(&self) -> MutexGuard<'_, HashMap<String, Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reap_once(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.is_expired_at(now))
            .map(|entry| entry.key().clone())
            .collect();

        let mut reaped = 0;
        for key in expired {
            let mut pending = self.lock_pending();
            // Re-stored since the scan
            if self
                .entries
                .remove_if(&key, |_, entry| entry.is_expired_at(now))
                .is_none()
            {
                continue;
            }
            tracing::debug!(key = %key, "memorycache cache reap");
            pending.remove(&key);
            reaped += 1;
        }
        reaped
    }
}

/// Process-local [`Cache`] with request coalescing
///
/// Cloning yields another handle onto the same cache.
#[derive(Clone)]
pub struct MemoryCache {
    inner: Arc<Inner>,
}

enum Role {
    Fetch(u64),
    Wait(watch::Receiver<()>),
}

/// Resolves the pending record of a fetch on every exit path, cancellation
/// included
struct PendingGuard<'a> {
    inner: &'a Inner,
    key: &'a str,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut pending = self.inner.lock_pending();
        if pending.get(self.key).is_some_and(|p| p.id == self.id) {
            pending.remove(self.key);
        }
    }
}

impl MemoryCache {
    /// A cache without a reaper; entries live until [`MemoryCache::reap_once`]
    /// removes them
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                entries: DashMap::new(),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// A cache with its background reaper running on the current tokio
    /// runtime. The reaper stops once every handle is dropped.
    pub fn connect(config: CacheConfig) -> Result<Self, CacheError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| CacheError::NoRuntime)?;
        let cache = Self::new(config);
        tracing::info!(
            reap_interval = ?cache.inner.config.reap_interval,
            "memorycache setup"
        );

        let weak = Arc::downgrade(&cache.inner);
        let interval = cache.inner.config.reap_interval.max(Duration::from_millis(1));
        runtime.spawn(reap(weak, interval));
        Ok(cache)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// One full pass removing expired entries; returns how many were removed
    pub fn reap_once(&self) -> usize {
        self.inner.reap_once()
    }

    /// The cached value for `key`, fetching and storing it on a miss
    ///
    /// Concurrent callers for the same key share one `fetch`: the first one
    /// runs it, the others wait up to `wait_timeout` and then read what it
    /// stored. A failed or cancelled fetch wakes the waiters, which then
    /// report [`CacheError::FetchFailed`].
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<Value, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: std::fmt::Display,
    {
        if let Ok(value) = self.retrieve(key) {
            return Ok(value);
        }

        let role = {
            let mut pending = self.inner.lock_pending();
            if let Some(entry) = self.inner.entries.get(key) {
                return Ok(entry.value.clone());
            }
            match pending.get(key) {
                Some(p) => Role::Wait(p.done.subscribe()),
                None => {
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    let (done, _) = watch::channel(());
                    pending.insert(key.to_string(), Pending { id, done });
                    Role::Fetch(id)
                }
            }
        };

        match role {
            Role::Wait(mut done) => {
                tracing::debug!(key = %key, "memorycache waiting on in-flight fetch");
                let wait = self.inner.config.wait_timeout;
                if tokio::time::timeout(wait, done.changed()).await.is_err() {
                    return Err(CacheError::WaitTimeout {
                        key: key.to_string(),
                    });
                }
                self.retrieve(key).map_err(|_| CacheError::FetchFailed {
                    key: key.to_string(),
                    reason: "in-flight fetch did not populate the cache".to_string(),
                })
            }
            Role::Fetch(id) => {
                let _guard = PendingGuard {
                    inner: &self.inner,
                    key,
                    id,
                };
                let value = fetch().await.map_err(|e| CacheError::FetchFailed {
                    key: key.to_string(),
                    reason: e.to_string(),
                })?;
                self.store(key, value.clone(), ttl)?;
                Ok(value)
            }
        }
    }
}

async fn reap(inner: Weak<Inner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.reap_once();
    }
    tracing::debug!("memorycache reaper stopped");
}

impl Cache for MemoryCache {
    fn store(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        tracing::debug!(key = %key, ttl = ?ttl, "memorycache cache store");
        self.inner
            .entries
            .insert(key.to_string(), CacheEntry::new(key, value, ttl));
        Ok(())
    }

    fn retrieve(&self, key: &str) -> Result<Value, CacheError> {
        self.inner
            .entries
            .get(key)
            .map(|entry| entry.value.clone())
            .ok_or_else(|| CacheError::NotFound {
                key: key.to_string(),
            })
    }

    fn close(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::model::{LabelSet, Sample, SamplePair};
    use std::sync::atomic::AtomicUsize;

    fn vector(value: f64) -> Value {
        Value::Vector(vec![Sample {
            metric: LabelSet::new().with_label("job", "api"),
            value: SamplePair::new(1_000, value),
        }])
    }

    fn config() -> CacheConfig {
        CacheConfig {
            reap_interval: Duration::from_millis(50),
            ..Default::default()
        }
    }

    #[test]
    fn test_store_then_retrieve() {
        let cache = MemoryCache::new(config());
        for (i, ttl) in [0, 1, 60].into_iter().enumerate() {
            let key = format!("k{i}");
            cache.store(&key, vector(i as f64), Duration::from_secs(ttl)).unwrap();
            assert_eq!(cache.retrieve(&key).unwrap(), vector(i as f64));
        }
        cache.close().unwrap();
    }

    #[test]
    fn test_retrieve_missing_key() {
        let cache = MemoryCache::new(config());
        assert!(matches!(
            cache.retrieve("nope"),
            Err(CacheError::NotFound { key }) if key == "nope"
        ));
    }

    #[test]
    fn test_expired_entry_readable_until_reaped() {
        let cache = MemoryCache::new(config());
        cache.store("k", vector(1.0), Duration::ZERO).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        assert!(cache.retrieve("k").is_ok());
        assert_eq!(cache.reap_once(), 1);
        assert!(cache.retrieve("k").is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_reap_keeps_live_entries() {
        let cache = MemoryCache::new(config());
        cache.store("live", vector(1.0), Duration::from_secs(60)).unwrap();
        assert_eq!(cache.reap_once(), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_connect_without_runtime() {
        assert!(matches!(
            MemoryCache::connect(config()),
            Err(CacheError::NoRuntime)
        ));
    }

    #[tokio::test]
    async fn test_reaper_evicts_after_expiration() {
        let cache = MemoryCache::connect(config()).unwrap();
        cache.store("k", vector(1.0), Duration::from_secs(1)).unwrap();

        tokio::time::sleep(Duration::from_millis(1_300)).await;
        assert!(matches!(cache.retrieve("k"), Err(CacheError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_concurrent_misses_fetch_once() {
        let cache = MemoryCache::new(config());
        let counter = AtomicUsize::new(0);
        let fetches = &counter;

        let fetch = move || async move {
            fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, String>(vector(42.0))
        };

        let (a, b) = tokio::join!(
            cache.get_or_fetch("q", Duration::from_secs(60), fetch),
            cache.get_or_fetch("q", Duration::from_secs(60), fetch),
        );

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap(), vector(42.0));
        assert_eq!(b.unwrap(), vector(42.0));

        // Later callers hit the stored entry
        let c = cache
            .get_or_fetch("q", Duration::from_secs(60), fetch)
            .await
            .unwrap();
        assert_eq!(c, vector(42.0));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_releases_waiters() {
        let cache = MemoryCache::new(config());

        let failing = || async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err::<Value, _>("backend down")
        };
        let unused = || async { Ok::<_, String>(vector(1.0)) };

        let (a, b) = tokio::join!(
            cache.get_or_fetch("q", Duration::from_secs(60), failing),
            cache.get_or_fetch("q", Duration::from_secs(60), unused),
        );

        assert!(matches!(a, Err(CacheError::FetchFailed { ref reason, .. }) if reason == "backend down"));
        assert!(matches!(b, Err(CacheError::FetchFailed { .. })));

        // The pending record is gone, so the next caller fetches again
        let c = cache
            .get_or_fetch("q", Duration::from_secs(60), unused)
            .await
            .unwrap();
        assert_eq!(c, vector(1.0));
    }

    #[tokio::test]
    async fn test_waiter_times_out() {
        let cache = MemoryCache::new(CacheConfig {
            wait_timeout: Duration::from_millis(20),
            ..config()
        });

        let slow = || async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, String>(vector(1.0))
        };

        let (a, b) = tokio::join!(
            cache.get_or_fetch("q", Duration::from_secs(60), slow),
            cache.get_or_fetch("q", Duration::from_secs(60), slow),
        );

        assert!(a.is_ok());
        assert!(matches!(b, Err(CacheError::WaitTimeout { .. })));
    }

    #[tokio::test]
    async fn test_reap_resolves_pending_waiters() {
        let cache = MemoryCache::new(config());
        let (_release, blocked) = tokio::sync::oneshot::channel::<()>();

        let fetcher = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch("q", Duration::from_secs(60), || async move {
                        let _ = blocked.await;
                        Ok::<_, String>(vector(1.0))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch("q", Duration::from_secs(60), || async {
                        Ok::<_, String>(vector(2.0))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // An expired entry for the key gets reaped together with the
        // pending record, which wakes the waiter
        cache.store("q", vector(0.0), Duration::ZERO).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(cache.reap_once(), 1);

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be woken by the reaper")
            .unwrap();
        assert!(matches!(result, Err(CacheError::FetchFailed { .. })));

        fetcher.abort();
    }
}
