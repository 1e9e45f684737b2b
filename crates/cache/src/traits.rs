//! Capability traits shared by the backing store and every decorating layer
//!
//! Each layer implements the same small set of operations and wraps another
//! implementer of it, so the pipeline is assembled by plain composition:
//!
//! ```text
//! CrossProcessSynchronizingCache
//!   └─ InMemoryDecoratedCache        (only for long-lived processes or opted-in caches)
//!        └─ AsyncWriteBehindCache
//!             └─ backing store        (caller supplied)
//! ```

use cachetier_core::{LockState, Result};
use std::fmt::Debug;
use std::hash::Hash;

/// Keys usable in the caching tier
pub trait CacheKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

/// Values usable in the caching tier
pub trait CacheValue: Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Send + Sync + 'static {}

/// Key-value operations of a persistent, indexed cache.
///
/// The on-disk store implements this, and so does each decorating layer.
/// Implementations must be safe to call from many worker threads at once.
pub trait PersistentIndexedCache<K, V>: Send + Sync {
    /// Look up a value, returning `None` when the key is absent
    fn get(&self, key: &K) -> Result<Option<V>>;

    /// Store a value, replacing any previous one
    fn put(&self, key: K, value: V) -> Result<()>;

    /// Remove a value; removing an absent key is not an error
    fn remove(&self, key: &K) -> Result<()>;
}

/// A layer that participates in the cross-process lock lifecycle.
///
/// The cross-process layer calls these hooks around every lock hand-over so
/// inner layers can react without owning the lock themselves.
pub trait LockAwareCache<K, V>: PersistentIndexedCache<K, V> {
    /// Called once the lock is held, with the state the previous owner published
    fn after_lock_acquire(&self, _state: LockState) {}

    /// Make all deferred work visible in the backing store.
    ///
    /// Runs before the lock is released; blocks for a bounded time.
    fn finish_work(&self) -> Result<()>;

    /// Called just before the lock is released with the state being published
    fn before_lock_release(&self, _state: LockState) {}

    /// Report a deferred failure recorded for `key`, if any.
    ///
    /// Layers that short-circuit reads call this so a failed write is not
    /// masked by a value that only ever existed in memory.
    fn surface_failure(&self, _key: &K) -> Result<()> {
        Ok(())
    }
}
