//! Read-mostly memoization cache shared by the catalog.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{PoisonError, RwLock};

/// A concurrent map where lookups take a read lock and only misses
/// take the write lock.
///
/// Values are expected to be cheap to clone (usually `Arc<_>`).
#[derive(Debug)]
pub struct Cache<K, V> {
    map: RwLock<HashMap<K, V>>,
}

impl<K, V> Default for Cache<K, V> {
    fn default() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash, V: Clone> Cache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a cached value.
    pub fn get(&self, key: &K) -> Option<V> {
        let map = self.map.read().unwrap_or_else(PoisonError::into_inner);
        map.get(key).cloned()
    }

    /// Get a cached value or build and insert it.
    ///
    /// Misses build under the write lock after a re-check, so a `flush`
    /// issued while a build is running waits for it and then discards its
    /// result. A failed build caches nothing.
    ///
    /// `build` may use other caches but must not look up this one.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: K,
        build: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        // Check cache first (read lock)
        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }

        let mut map = self.map.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(hit) = map.get(&key) {
            return Ok(hit.clone());
        }
        let built = build()?;
        map.insert(key, built.clone());
        Ok(built)
    }

    /// Drop every entry.
    pub fn flush(&self) {
        let mut map = self.map.write().unwrap_or_else(PoisonError::into_inner);
        map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_hit_skips_builder() {
        let cache: Cache<&str, usize> = Cache::new();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let v = cache
                .get_or_try_insert_with("k", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(7)
                })
                .unwrap();
            assert_eq!(v, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_is_not_cached() {
        let cache: Cache<u8, u8> = Cache::new();
        assert!(cache.get_or_try_insert_with(1, || Err("boom")).is_err());
        assert!(cache.is_empty());
        assert_eq!(cache.get_or_try_insert_with(1, || Ok::<_, &str>(2)), Ok(2));
    }

    #[test]
    fn test_racing_builders_build_once() {
        let cache: Arc<Cache<u8, Arc<String>>> = Arc::new(Cache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    cache
                        .get_or_try_insert_with(0, || Ok::<_, ()>(Arc::new(format!("v{}", i))))
                        .unwrap()
                })
            })
            .collect();
        let values: Vec<Arc<String>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winner = cache.get(&0).unwrap();
        assert!(values.iter().all(|v| Arc::ptr_eq(v, &winner)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_flush_waits_for_running_build() {
        let cache: Arc<Cache<u8, u8>> = Arc::new(Cache::new());
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let builder = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                cache
                    .get_or_try_insert_with(1, || {
                        entered_tx.send(()).unwrap();
                        release_rx.recv().unwrap();
                        Ok::<_, ()>(1)
                    })
                    .unwrap()
            })
        };
        entered_rx.recv().unwrap();

        let flusher = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.flush())
        };
        thread::sleep(Duration::from_millis(50));
        release_tx.send(()).unwrap();

        assert_eq!(builder.join().unwrap(), 1);
        flusher.join().unwrap();
        assert!(cache.get(&1).is_none());
    }

    #[test]
    fn test_flush() {
        let cache: Cache<u8, u8> = Cache::new();
        cache.get_or_try_insert_with(1, || Ok::<_, ()>(1)).unwrap();
        cache.flush();
        assert!(cache.get(&1).is_none());
    }
}
