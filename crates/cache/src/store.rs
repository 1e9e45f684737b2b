//! Bounded, thread-safe in-memory store shared by all pipelines of one cache

use crate::eviction::{EvictionCause, EvictionEvent, EvictionSink};
use crate::traits::{CacheKey, CacheValue};
use cachetier_core::{Error, Result};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time counters of an [`InMemoryStore`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
}

impl StoreStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

#[derive(Debug, Default)]
struct StoreCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

/// Read-through loads of one key that are still in flight
#[derive(Debug, Default)]
struct PendingFill {
    readers: usize,
    superseded: bool,
}

struct StoreInner<K: CacheKey, V: CacheValue> {
    entries: LruCache<K, V>,
    fills: HashMap<K, PendingFill>,
}

impl<K: CacheKey, V: CacheValue> StoreInner<K, V> {
    /// Any write to `key` makes values loaded before it stale
    fn supersede(&mut self, key: &K) {
        if let Some(fill) = self.fills.get_mut(key) {
            fill.superseded = true;
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        for fill in self.fills.values_mut() {
            fill.superseded = true;
        }
    }

    /// Returns whether the finished fill may still be stored
    fn release_fill(&mut self, key: &K) -> bool {
        let Some(fill) = self.fills.get_mut(key) else {
            return false;
        };
        let current = !fill.superseded;
        fill.readers -= 1;
        if fill.readers == 0 {
            self.fills.remove(key);
        }
        current
    }

    fn push(&mut self, key: K, value: V) -> Option<K> {
        match self.entries.push(key.clone(), value) {
            // push hands back the old value when the key was already present
            Some((old_key, _)) if old_key == key => None,
            other => other.map(|(evicted, _)| evicted),
        }
    }
}

/// LRU store with a fixed capacity.
///
/// Contents are tagged with the invalidation generation they were loaded
/// under; syncing to a newer generation drops everything.
///
/// Values loaded from below go through [`InMemoryStore::begin_fill`], so a
/// load that raced with a write to the same key never replaces the newer
/// value.
pub struct InMemoryStore<K: CacheKey, V: CacheValue> {
    cache_id: String,
    inner: Mutex<StoreInner<K, V>>,
    generation: AtomicU64,
    counters: StoreCounters,
    evictions: EvictionSink,
}

impl<K: CacheKey, V: CacheValue> InMemoryStore<K, V> {
    pub fn new(cache_id: impl Into<String>, max_entries: usize, evictions: EvictionSink) -> Result<Self> {
        let cache_id = cache_id.into();
        let capacity = NonZeroUsize::new(max_entries).ok_or_else(|| {
            Error::configuration(format!(
                "in-memory store for cache '{cache_id}' needs a capacity of at least 1"
            ))
        })?;

        Ok(Self {
            cache_id,
            inner: Mutex::new(StoreInner {
                entries: LruCache::new(capacity),
                fills: HashMap::new(),
            }),
            generation: AtomicU64::new(0),
            counters: StoreCounters::default(),
            evictions,
        })
    }

    pub fn cache_id(&self) -> &str {
        &self.cache_id
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let value = self.inner.lock().entries.get(key).cloned();
        let counter = if value.is_some() {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        value
    }

    /// Insert or replace, evicting the least recently used entry when full
    pub fn insert(&self, key: K, value: V) {
        let evicted = {
            let mut inner = self.inner.lock();
            inner.supersede(&key);
            let evicted = inner.push(key, value);
            evicted.map(|evicted| (evicted, inner.entries.len(), inner.entries.cap().get()))
        };
        self.report_eviction(evicted);
    }

    /// Start loading `key` from below.
    ///
    /// The returned guard stores the loaded value only if no write to `key`
    /// and no invalidation happened in between.
    pub fn begin_fill(&self, key: &K) -> FillGuard<'_, K, V> {
        self.inner
            .lock()
            .fills
            .entry(key.clone())
            .or_default()
            .readers += 1;
        FillGuard {
            store: self,
            key: key.clone(),
            finished: false,
        }
    }

    fn report_eviction(&self, evicted: Option<(K, usize, usize)>) {
        if let Some((evicted_key, size, max_size)) = evicted {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            self.evictions.notify(EvictionEvent {
                cache_id: self.cache_id.clone(),
                key: format!("{evicted_key:?}"),
                cause: EvictionCause::Size,
                size,
                max_size,
                stats: self.stats(),
            });
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        inner.supersede(key);
        inner.entries.pop(key)
    }

    pub fn invalidate_all(&self) {
        self.inner.lock().clear();
        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(cache_id = %self.cache_id, "Invalidated in-memory store");
    }

    /// Bring the store up to `generation`, clearing it if it was loaded under
    /// an older one. Returns whether anything was cleared.
    pub fn sync_generation(&self, generation: u64) -> bool {
        if self.generation.load(Ordering::Acquire) >= generation {
            return false;
        }

        let mut inner = self.inner.lock();
        if self.generation.load(Ordering::Acquire) >= generation {
            return false;
        }
        inner.clear();
        self.generation.store(generation, Ordering::Release);
        drop(inner);

        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            cache_id = %self.cache_id,
            generation,
            "Cleared in-memory store for new generation"
        );
        true
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().entries.cap().get()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
        }
    }
}

impl<K: CacheKey, V: CacheValue> std::fmt::Debug for InMemoryStore<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("cache_id", &self.cache_id)
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("generation", &self.generation())
            .finish()
    }
}

/// An in-flight load started by [`InMemoryStore::begin_fill`]
pub struct FillGuard<'a, K: CacheKey, V: CacheValue> {
    store: &'a InMemoryStore<K, V>,
    key: K,
    finished: bool,
}

impl<K: CacheKey, V: CacheValue> FillGuard<'_, K, V> {
    /// Store the loaded value unless a write or invalidation overtook the
    /// load. Returns whether it was stored.
    pub fn complete(mut self, value: V) -> bool {
        self.finished = true;
        let evicted = {
            let mut inner = self.store.inner.lock();
            if !inner.release_fill(&self.key) || inner.entries.contains(&self.key) {
                return false;
            }
            let evicted = inner.push(self.key.clone(), value);
            evicted.map(|evicted| (evicted, inner.entries.len(), inner.entries.cap().get()))
        };
        self.store.report_eviction(evicted);
        true
    }
}

impl<K: CacheKey, V: CacheValue> Drop for FillGuard<'_, K, V> {
    fn drop(&mut self) {
        if !self.finished {
            self.store.inner.lock().release_fill(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eviction::EvictionObserver;
    use std::time::Duration;

    fn store(capacity: usize) -> (InMemoryStore<String, u32>, EvictionObserver) {
        let observer = EvictionObserver::new().unwrap();
        let store = InMemoryStore::new("test", capacity, observer.sink()).unwrap();
        (store, observer)
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let observer = EvictionObserver::new().unwrap();
        let result = InMemoryStore::<String, u32>::new("test", 0, observer.sink());
        assert!(matches!(result, Err(Error::InvalidConfiguration { .. })));
    }

    #[test]
    fn test_get_insert_remove() {
        let (store, _observer) = store(4);
        assert_eq!(store.get(&"a".to_string()), None);

        store.insert("a".to_string(), 1);
        store.insert("a".to_string(), 2);
        assert_eq!(store.get(&"a".to_string()), Some(2));
        assert_eq!(store.len(), 1);

        assert_eq!(store.remove(&"a".to_string()), Some(2));
        assert!(store.is_empty());

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 0);
    }

    #[test]
    fn test_full_store_evicts_least_recently_used() {
        let (store, observer) = store(2);
        let events = observer.subscribe();

        store.insert("a".to_string(), 1);
        store.insert("b".to_string(), 2);
        // Touch "a" so "b" becomes the eviction candidate
        store.get(&"a".to_string());
        store.insert("c".to_string(), 3);

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&"b".to_string()), None);
        assert_eq!(store.get(&"a".to_string()), Some(1));
        assert_eq!(store.stats().evictions, 1);

        let event = events.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(event.cache_id, "test");
        assert_eq!(event.key, "\"b\"");
        assert_eq!(event.cause, EvictionCause::Size);
        assert_eq!(event.max_size, 2);
    }

    #[test]
    fn test_replacing_a_key_is_not_an_eviction() {
        let (store, _observer) = store(1);
        store.insert("a".to_string(), 1);
        store.insert("a".to_string(), 2);
        assert_eq!(store.stats().evictions, 0);
    }

    #[test]
    fn test_fill_overtaken_by_write_is_dropped() {
        let (store, _observer) = store(4);

        let fill = store.begin_fill(&"a".to_string());
        store.insert("a".to_string(), 2);
        assert!(!fill.complete(1));
        assert_eq!(store.get(&"a".to_string()), Some(2));

        let fill = store.begin_fill(&"b".to_string());
        store.remove(&"b".to_string());
        assert!(!fill.complete(1));
        assert_eq!(store.get(&"b".to_string()), None);
    }

    #[test]
    fn test_fill_overtaken_by_invalidation_is_dropped() {
        let (store, _observer) = store(4);

        let fill = store.begin_fill(&"a".to_string());
        store.invalidate_all();
        assert!(!fill.complete(1));

        let fill = store.begin_fill(&"a".to_string());
        assert!(store.sync_generation(1));
        assert!(!fill.complete(1));
        assert!(store.is_empty());
    }

    #[test]
    fn test_uncontested_fill_is_stored() {
        let (store, _observer) = store(4);

        let fill = store.begin_fill(&"a".to_string());
        // Writes to other keys do not matter
        store.insert("b".to_string(), 2);
        assert!(fill.complete(1));
        assert_eq!(store.get(&"a".to_string()), Some(1));

        // An abandoned fill leaves nothing behind
        drop(store.begin_fill(&"c".to_string()));
        let fill = store.begin_fill(&"c".to_string());
        assert!(fill.complete(3));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_sync_generation_clears_once() {
        let (store, _observer) = store(4);
        store.insert("a".to_string(), 1);

        assert!(store.sync_generation(1));
        assert!(store.is_empty());

        store.insert("b".to_string(), 2);
        assert!(!store.sync_generation(1));
        // Older generations never clear
        assert!(!store.sync_generation(0));
        assert_eq!(store.len(), 1);
        assert_eq!(store.stats().invalidations, 1);
    }
}
