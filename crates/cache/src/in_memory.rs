//! Read short-circuit in front of the write-behind layer

use crate::store::InMemoryStore;
use crate::token::InvalidationToken;
use crate::traits::{CacheKey, CacheValue, LockAwareCache, PersistentIndexedCache};
use cachetier_core::{LockState, Result};
use std::sync::Arc;

/// Serves reads from a shared [`InMemoryStore`] and keeps it in step with
/// every write passing through.
///
/// Before touching the store, each operation syncs it to the token's
/// generation, so entries loaded before another process changed the backing
/// store are never returned.
pub struct InMemoryDecoratedCache<K: CacheKey, V: CacheValue> {
    cache_id: String,
    delegate: Arc<dyn LockAwareCache<K, V>>,
    store: Arc<InMemoryStore<K, V>>,
    token: InvalidationToken,
}

impl<K: CacheKey, V: CacheValue> InMemoryDecoratedCache<K, V> {
    pub fn new(
        cache_id: impl Into<String>,
        delegate: Arc<dyn LockAwareCache<K, V>>,
        store: Arc<InMemoryStore<K, V>>,
        token: InvalidationToken,
    ) -> Self {
        Self {
            cache_id: cache_id.into(),
            delegate,
            store,
            token,
        }
    }

    pub fn store(&self) -> &Arc<InMemoryStore<K, V>> {
        &self.store
    }

    fn sync(&self) {
        self.store.sync_generation(self.token.generation());
    }
}

impl<K: CacheKey, V: CacheValue> PersistentIndexedCache<K, V> for InMemoryDecoratedCache<K, V> {
    fn get(&self, key: &K) -> Result<Option<V>> {
        self.sync();
        if let Err(err) = self.delegate.surface_failure(key) {
            // The rejected value must not outlive the error
            self.store.remove(key);
            return Err(err);
        }

        if let Some(value) = self.store.get(key) {
            return Ok(Some(value));
        }

        let fill = self.store.begin_fill(key);
        let value = self.delegate.get(key)?;
        if let Some(value) = &value {
            fill.complete(value.clone());
        }
        Ok(value)
    }

    fn put(&self, key: K, value: V) -> Result<()> {
        self.sync();
        self.delegate.put(key.clone(), value.clone())?;
        self.store.insert(key, value);
        Ok(())
    }

    fn remove(&self, key: &K) -> Result<()> {
        self.sync();
        self.delegate.remove(key)?;
        self.store.remove(key);
        Ok(())
    }
}

impl<K: CacheKey, V: CacheValue> LockAwareCache<K, V> for InMemoryDecoratedCache<K, V> {
    fn after_lock_acquire(&self, state: LockState) {
        if self.store.sync_generation(self.token.generation()) {
            tracing::debug!(cache_id = %self.cache_id, %state, "Dropped stale in-memory entries");
        }
        self.delegate.after_lock_acquire(state);
    }

    fn finish_work(&self) -> Result<()> {
        self.delegate.finish_work().map_err(|err| {
            // Memory may hold values the backing store never received
            tracing::warn!(
                cache_id = %self.cache_id,
                error = %err,
                "Pending writes failed, invalidating in-memory store"
            );
            self.store.invalidate_all();
            err
        })
    }

    fn before_lock_release(&self, state: LockState) {
        self.delegate.before_lock_release(state);
    }

    fn surface_failure(&self, key: &K) -> Result<()> {
        self.delegate.surface_failure(key)
    }
}
