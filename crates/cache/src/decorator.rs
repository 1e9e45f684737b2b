//! Assembly of decorated caches from a backing store and a lock

use crate::config::CacheTierSettings;
use crate::cross_process::CrossProcessSynchronizingCache;
use crate::eviction::EvictionObserver;
use crate::in_memory::InMemoryDecoratedCache;
use crate::registry::{CacheDetails, CacheRegistry};
use crate::sizer::HeapProportionalCacheSizer;
use crate::store::InMemoryStore;
use crate::token::InvalidationToken;
use crate::traits::{CacheKey, CacheValue, LockAwareCache, PersistentIndexedCache};
use crate::write_behind::AsyncWriteBehindCache;
use cachetier_core::{CrossProcessLock, Error, Result};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

struct FactoryState {
    long_living_process: bool,
    settings: CacheTierSettings,
    sizer: HeapProportionalCacheSizer,
    registry: Arc<CacheRegistry>,
    evictions: EvictionObserver,
}

/// Builds decorated caches whose in-memory stores live in one [`CacheRegistry`]
#[derive(Clone)]
pub struct InMemoryCacheDecoratorFactory {
    state: Arc<FactoryState>,
}

impl InMemoryCacheDecoratorFactory {
    /// `long_living_process` is true for daemons that serve many builds; in
    /// short-lived processes only caches that opt in get an in-memory store.
    pub fn new(
        long_living_process: bool,
        settings: CacheTierSettings,
        registry: Arc<CacheRegistry>,
    ) -> Result<Self> {
        settings.validate()?;
        let evictions = EvictionObserver::new()
            .map_err(|err| Error::io("", "spawn eviction observer", err))?;

        Ok(Self {
            state: Arc::new(FactoryState {
                long_living_process,
                sizer: HeapProportionalCacheSizer::from_settings(&settings),
                settings,
                registry,
                evictions,
            }),
        })
    }

    pub fn is_long_living_process(&self) -> bool {
        self.state.long_living_process
    }

    pub fn registry(&self) -> &Arc<CacheRegistry> {
        &self.state.registry
    }

    pub fn eviction_observer(&self) -> &EvictionObserver {
        &self.state.evictions
    }

    pub fn sizer(&self) -> &HeapProportionalCacheSizer {
        &self.state.sizer
    }

    /// A reusable decorator for one caching policy
    pub fn decorator(
        &self,
        max_entries_to_keep_in_memory: usize,
        cache_in_memory_for_short_lived_processes: bool,
    ) -> CacheDecorator {
        CacheDecorator {
            max_entries_to_keep_in_memory,
            cache_in_memory_for_short_lived_processes,
            factory: self.clone(),
        }
    }

    /// Wrap `backing` in the write-behind, in-memory (when applicable) and
    /// cross-process layers.
    ///
    /// # Errors
    ///
    /// - `InvalidConfiguration` if `max_entries_to_keep_in_memory` is zero
    /// - `ConfigurationMismatch` / `StoreTypeMismatch` from the registry
    pub fn decorate<K: CacheKey, V: CacheValue>(
        &self,
        cache_id: &str,
        max_entries_to_keep_in_memory: usize,
        cache_in_memory_for_short_lived_processes: bool,
        backing: Arc<dyn PersistentIndexedCache<K, V>>,
        lock: Arc<dyn CrossProcessLock>,
    ) -> Result<CrossProcessSynchronizingCache<K, V>> {
        if max_entries_to_keep_in_memory == 0 {
            return Err(Error::configuration(format!(
                "cache '{cache_id}' must keep at least one entry in memory"
            )));
        }

        let settings = &self.state.settings;
        let write_behind: Arc<dyn LockAwareCache<K, V>> = Arc::new(AsyncWriteBehindCache::new(
            cache_id,
            backing,
            settings.flush_timeout,
        )?);

        if !self.state.long_living_process && !cache_in_memory_for_short_lived_processes {
            tracing::info!(cache_id, "Creating cache {cache_id} without in-memory store.");
            return Ok(CrossProcessSynchronizingCache::new(
                cache_id,
                write_behind,
                lock,
                InvalidationToken::new(),
                settings,
            ));
        }

        let target_size = self.state.sizer.scale_cache_size(max_entries_to_keep_in_memory);
        let details = self.state.registry.get_or_create(cache_id, target_size, || {
            let store = InMemoryStore::new(cache_id, target_size, self.state.evictions.sink())?;
            Ok(CacheDetails::new(cache_id, target_size, store))
        })?;

        let in_memory = InMemoryDecoratedCache::new(
            cache_id,
            write_behind,
            Arc::clone(&details.store),
            details.token.clone(),
        );
        Ok(CrossProcessSynchronizingCache::new(
            cache_id,
            Arc::new(in_memory),
            lock,
            details.token.clone(),
            settings,
        ))
    }
}

impl std::fmt::Debug for InMemoryCacheDecoratorFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCacheDecoratorFactory")
            .field("long_living_process", &self.state.long_living_process)
            .field("sizing_ratio", &self.state.sizer.sizing_ratio())
            .field("registry", &self.state.registry)
            .finish()
    }
}

/// Caching policy bound to a factory.
///
/// Two decorators are equal when their policies are, whichever factory they
/// came from, so callers may deduplicate them.
#[derive(Clone)]
pub struct CacheDecorator {
    max_entries_to_keep_in_memory: usize,
    cache_in_memory_for_short_lived_processes: bool,
    factory: InMemoryCacheDecoratorFactory,
}

impl CacheDecorator {
    pub fn max_entries_to_keep_in_memory(&self) -> usize {
        self.max_entries_to_keep_in_memory
    }

    pub fn cache_in_memory_for_short_lived_processes(&self) -> bool {
        self.cache_in_memory_for_short_lived_processes
    }

    pub fn decorate<K: CacheKey, V: CacheValue>(
        &self,
        cache_id: &str,
        backing: Arc<dyn PersistentIndexedCache<K, V>>,
        lock: Arc<dyn CrossProcessLock>,
    ) -> Result<CrossProcessSynchronizingCache<K, V>> {
        self.factory.decorate(
            cache_id,
            self.max_entries_to_keep_in_memory,
            self.cache_in_memory_for_short_lived_processes,
            backing,
            lock,
        )
    }
}

impl PartialEq for CacheDecorator {
    fn eq(&self, other: &Self) -> bool {
        self.max_entries_to_keep_in_memory == other.max_entries_to_keep_in_memory
            && self.cache_in_memory_for_short_lived_processes
                == other.cache_in_memory_for_short_lived_processes
    }
}

impl Eq for CacheDecorator {}

impl Hash for CacheDecorator {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.max_entries_to_keep_in_memory.hash(state);
        self.cache_in_memory_for_short_lived_processes.hash(state);
    }
}

impl std::fmt::Debug for CacheDecorator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheDecorator")
            .field("max_entries_to_keep_in_memory", &self.max_entries_to_keep_in_memory)
            .field(
                "cache_in_memory_for_short_lived_processes",
                &self.cache_in_memory_for_short_lived_processes,
            )
            .finish()
    }
}
