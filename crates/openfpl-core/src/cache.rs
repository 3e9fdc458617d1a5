// Single-flight result cache keyed by gameweek (or any hashable key).
//
// The key map is locked only long enough to fetch or insert the per-key cell.
// Each cell serializes its own computation, so concurrent callers for one key
// share a single run while other keys proceed independently.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::scout::ScoutError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("computation for {key} failed")]
pub struct CacheComputationError {
    pub key: String,
    #[source]
    pub source: ScoutError,
}

type Slot<V> = Arc<OnceCell<Arc<V>>>;

pub struct ResultCache<K, V> {
    entries: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> Default for ResultCache<K, V> {
    fn default() -> Self {
        ResultCache {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> fmt::Debug for ResultCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCache").finish_non_exhaustive()
    }
}

impl<K, V> ResultCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Display,
{
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, key: &K) -> Slot<V> {
        let mut entries = self.entries.lock().await;
        entries.entry(key.clone()).or_default().clone()
    }

    /// Remove `key` if it still maps to `slot` and `slot` never completed.
    async fn release(&self, key: &K, slot: &Slot<V>) {
        let mut entries = self.entries.lock().await;
        let stale = entries
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && !current.initialized());
        if stale {
            entries.remove(key);
        }
    }

    /// Return the cached value for `key`, or run `compute` to produce it.
    ///
    /// Concurrent callers for the same key wait on one computation and get
    /// the same `Arc`. A failed computation stores nothing and leaves no
    /// entry behind, so the next caller runs `compute` again.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: K,
        compute: F,
    ) -> Result<Arc<V>, CacheComputationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ScoutError>>,
    {
        let slot = self.slot(&key).await;
        if let Some(value) = slot.get() {
            debug!("cache hit for {key}");
            return Ok(Arc::clone(value));
        }

        let result = slot
            .get_or_try_init(|| async {
                info!("computing result for {key}");
                compute().await.map(Arc::new)
            })
            .await;

        match result {
            Ok(value) => Ok(Arc::clone(value)),
            Err(source) => {
                warn!("computation for {key} failed: {source}");
                self.release(&key, &slot).await;
                Err(CacheComputationError {
                    key: key.to_string(),
                    source,
                })
            }
        }
    }

    /// Drop the entry for `key`. A computation already in flight still
    /// completes for its waiters; later callers start afresh.
    pub async fn invalidate(&self, key: &K) -> bool {
        let removed = self.entries.lock().await.remove(key).is_some();
        if removed {
            debug!("invalidated cache entry for {key}");
        }
        removed
    }

    /// The completed value for `key`, if any. Never computes.
    pub async fn get(&self, key: &K) -> Option<Arc<V>> {
        let entries = self.entries.lock().await;
        entries.get(key).and_then(|slot| slot.get().cloned())
    }

    /// Number of keys holding a completed value.
    pub async fn len(&self) -> usize {
        let entries = self.entries.lock().await;
        entries.values().filter(|slot| slot.initialized()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Keys present in the map, pending or complete.
    #[cfg(test)]
    pub(crate) async fn entry_count(&self) -> usize {
        self.entries.lock().await.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_share_one_computation() {
        let cache: ResultCache<u32, String> = ResultCache::new();
        let counter = AtomicUsize::new(0);
        let runs = &counter;

        let compute = || async move {
            runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, ScoutError>("team".to_string())
        };

        let (a, b) = tokio::join!(
            cache.get_or_compute(7, compute),
            cache.get_or_compute(7, compute)
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(*a, "team");
    }

    #[tokio::test]
    async fn second_request_hits_cache() {
        let cache: ResultCache<u32, u32> = ResultCache::new();
        let counter = AtomicUsize::new(0);
        let runs = &counter;
        let compute = || async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        };

        let first = cache.get_or_compute(1, compute).await.unwrap();
        let second = cache.get_or_compute(1, compute).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_keys_compute_independently() {
        let cache: ResultCache<u32, u32> = ResultCache::new();
        let slow = || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(1)
        };
        let fast = || async { Ok(2) };

        // The fast key completes while the slow one is still pending.
        let fast_result = tokio::select! {
            _ = cache.get_or_compute(1, slow) => None,
            r = async {
                tokio::time::sleep(Duration::from_millis(1)).await;
                cache.get_or_compute(2, fast).await
            } => Some(r),
        };
        assert_eq!(*fast_result.unwrap().unwrap(), 2);
    }

    #[tokio::test]
    async fn failure_is_not_cached() {
        let cache: ResultCache<u32, u32> = ResultCache::new();
        let counter = AtomicUsize::new(0);
        let runs = &counter;

        let err = cache
            .get_or_compute(3, || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Err(ScoutError::NoData { gameweek: 3 })
            })
            .await
            .unwrap_err();
        assert_eq!(err.key, "3");
        assert_eq!(err.source, ScoutError::NoData { gameweek: 3 });
        assert!(cache.get(&3).await.is_none());

        let ok = cache
            .get_or_compute(3, || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(9)
            })
            .await
            .unwrap();
        assert_eq!(*ok, 9);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_keys_leave_no_entries() {
        let cache: ResultCache<u32, u32> = ResultCache::new();
        for gameweek in 0..1_000 {
            let result = cache
                .get_or_compute(gameweek, || async move {
                    Err(ScoutError::NoData { gameweek })
                })
                .await;
            assert!(result.is_err());
        }
        assert_eq!(cache.entry_count().await, 0);
        assert!(cache.is_empty().await);

        cache.get_or_compute(7, || async { Ok(1) }).await.unwrap();
        assert_eq!(cache.entry_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_keeps_entry_another_caller_filled() {
        let cache: ResultCache<u32, u32> = ResultCache::new();
        let failing = || async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(ScoutError::NoData { gameweek: 4 })
        };
        let (failed, _) = tokio::join!(cache.get_or_compute(4, failing), async {
            // Replace the pending entry before the first computation fails.
            tokio::time::sleep(Duration::from_millis(1)).await;
            cache.invalidate(&4).await;
            cache.get_or_compute(4, || async { Ok(8) }).await.unwrap()
        });
        assert!(failed.is_err());
        assert_eq!(cache.get(&4).await.as_deref(), Some(&8));
        assert_eq!(cache.entry_count().await, 1);
    }

    #[tokio::test]
    async fn invalidate_forces_recompute() {
        let cache: ResultCache<u32, u32> = ResultCache::new();
        let first = cache.get_or_compute(5, || async { Ok(1) }).await.unwrap();
        assert!(cache.invalidate(&5).await);
        assert!(!cache.invalidate(&5).await);

        let second = cache.get_or_compute(5, || async { Ok(2) }).await.unwrap();
        assert_eq!(*first, 1);
        assert_eq!(*second, 2);
    }
}
