//! Process-wide registry of in-memory stores, keyed by cache identifier
//!
//! Several pipelines decorating the same logical cache must share one store
//! and one invalidation token, otherwise a write through one pipeline would be
//! invisible to reads through another. The registry guarantees that the first
//! request for an identifier creates the pair and every later request reuses
//! it, provided the requested capacity matches.

use crate::store::InMemoryStore;
use crate::token::InvalidationToken;
use crate::traits::{CacheKey, CacheValue};
use cachetier_core::{Error, Result};
use dashmap::DashMap;
use std::any::Any;
use std::sync::Arc;

/// The shared state behind one cache identifier
#[derive(Debug)]
pub struct CacheDetails<K: CacheKey, V: CacheValue> {
    pub identifier: String,
    pub max_entries: usize,
    pub store: Arc<InMemoryStore<K, V>>,
    pub token: InvalidationToken,
}

impl<K: CacheKey, V: CacheValue> CacheDetails<K, V> {
    pub fn new(identifier: impl Into<String>, max_entries: usize, store: InMemoryStore<K, V>) -> Self {
        Self {
            identifier: identifier.into(),
            max_entries,
            store: Arc::new(store),
            token: InvalidationToken::new(),
        }
    }
}

struct RegisteredCache {
    max_entries: usize,
    details: Arc<dyn Any + Send + Sync>,
}

/// Map from cache identifier to its [`CacheDetails`]
#[derive(Default)]
pub struct CacheRegistry {
    caches: DashMap<String, RegisteredCache>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the details registered for `cache_id`, creating them with
    /// `factory` if this is the first request.
    ///
    /// The factory runs at most once per identifier even when many threads
    /// race here; the losers block on the map shard until the winner is done.
    ///
    /// # Errors
    ///
    /// - `ConfigurationMismatch` if the identifier exists with another size
    /// - `StoreTypeMismatch` if it exists with other key or value types
    /// - whatever the factory returns
    pub fn get_or_create<K, V, F>(
        &self,
        cache_id: &str,
        max_entries: usize,
        factory: F,
    ) -> Result<Arc<CacheDetails<K, V>>>
    where
        K: CacheKey,
        V: CacheValue,
        F: FnOnce() -> Result<CacheDetails<K, V>>,
    {
        let entry = self
            .caches
            .entry(cache_id.to_string())
            .or_try_insert_with(|| {
                let details = factory()?;
                tracing::info!(
                    cache_id,
                    max_entries,
                    "Creating in-memory store for cache {cache_id} (max size: {max_entries})"
                );
                Ok::<_, Error>(RegisteredCache {
                    max_entries,
                    details: Arc::new(details),
                })
            })?;

        if entry.max_entries != max_entries {
            return Err(Error::ConfigurationMismatch {
                cache_id: cache_id.to_string(),
                registered: entry.max_entries,
                requested: max_entries,
            });
        }

        Arc::clone(&entry.details)
            .downcast::<CacheDetails<K, V>>()
            .map_err(|_| Error::StoreTypeMismatch {
                cache_id: cache_id.to_string(),
            })
    }

    pub fn contains(&self, cache_id: &str) -> bool {
        self.caches.contains_key(cache_id)
    }

    /// In-memory capacity registered for `cache_id`
    pub fn max_entries(&self, cache_id: &str) -> Option<usize> {
        self.caches.get(cache_id).map(|entry| entry.max_entries)
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    pub fn identifiers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.caches.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("caches", &self.identifiers())
            .finish()
    }
}
