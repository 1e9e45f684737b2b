//! Cross-process synchronisation around the shared backing store
//!
//! Every operation runs while this process owns the external lock. Ownership
//! moves through `Unlocked -> Acquiring -> Held -> Releasing -> Unlocked`.
//! While held, any number of threads may run operations; the lock is handed
//! back when the last of them finishes, after pending writes are flushed and
//! the new lock state is published.

use crate::config::CacheTierSettings;
use crate::token::InvalidationToken;
use crate::traits::{CacheKey, CacheValue, LockAwareCache, PersistentIndexedCache};
use cachetier_core::{CrossProcessLock, Error, LockState, Result};
use cachetier_utils::RetryConfig;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockPhase {
    Unlocked,
    Acquiring,
    Held {
        state: LockState,
        holders: usize,
        dirty: bool,
    },
    Releasing,
}

/// Outermost layer of a decorated cache
pub struct CrossProcessSynchronizingCache<K: CacheKey, V: CacheValue> {
    cache_id: String,
    inner: Arc<dyn LockAwareCache<K, V>>,
    lock: Arc<dyn CrossProcessLock>,
    token: InvalidationToken,
    phase: Mutex<LockPhase>,
    phase_changed: Condvar,
    lock_timeout: Duration,
    retry: RetryConfig,
}

impl<K: CacheKey, V: CacheValue> CrossProcessSynchronizingCache<K, V> {
    pub fn new(
        cache_id: impl Into<String>,
        inner: Arc<dyn LockAwareCache<K, V>>,
        lock: Arc<dyn CrossProcessLock>,
        token: InvalidationToken,
        settings: &CacheTierSettings,
    ) -> Self {
        Self {
            cache_id: cache_id.into(),
            inner,
            lock,
            token,
            phase: Mutex::new(LockPhase::Unlocked),
            phase_changed: Condvar::new(),
            lock_timeout: settings.lock_timeout,
            retry: settings.lock_retry.clone(),
        }
    }

    pub fn cache_id(&self) -> &str {
        &self.cache_id
    }

    pub fn token(&self) -> &InvalidationToken {
        &self.token
    }

    /// The state acquired for the current hold, if the lock is held
    pub fn held_state(&self) -> Option<LockState> {
        match *self.phase.lock() {
            LockPhase::Held { state, .. } => Some(state),
            _ => None,
        }
    }

    pub fn is_held(&self) -> bool {
        self.held_state().is_some()
    }

    /// Run `work` with the lock held throughout.
    ///
    /// Operations issued from `work`, or from other threads while it runs,
    /// share the same hold. The lock is released once all of them are done.
    pub fn unit_of_work<T>(&self, work: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        self.with_file_lock(false, || work(self))
    }

    fn with_file_lock<T>(&self, mutates: bool, action: impl FnOnce() -> Result<T>) -> Result<T> {
        self.enter()?;
        let result = action();
        let released = self.exit(mutates);
        let value = result?;
        released?;
        Ok(value)
    }

    fn enter(&self) -> Result<()> {
        let started = Instant::now();
        let deadline = started + self.lock_timeout;

        let mut phase = self.phase.lock();
        loop {
            match *phase {
                LockPhase::Held {
                    state,
                    holders,
                    dirty,
                } => {
                    *phase = LockPhase::Held {
                        state,
                        holders: holders + 1,
                        dirty,
                    };
                    return Ok(());
                }
                LockPhase::Unlocked => break,
                LockPhase::Acquiring | LockPhase::Releasing => {
                    if Instant::now() >= deadline {
                        return Err(self.timeout(started.elapsed(), 0));
                    }
                    self.phase_changed.wait_until(&mut phase, deadline);
                }
            }
        }
        *phase = LockPhase::Acquiring;
        drop(phase);

        let acquired = self
            .acquire_with_backoff(started, deadline)
            .map(|state| {
                let previous = self.token.last_observed();
                if self.token.observe_acquired(state) && previous.is_some() {
                    tracing::info!(
                        cache_id = %self.cache_id,
                        lock = %self.lock.display_name(),
                        version = state.version(),
                        "Invalidating in-memory cache of {}",
                        self.cache_id
                    );
                }
                self.inner.after_lock_acquire(state);
                state
            });

        let mut phase = self.phase.lock();
        let outcome = match acquired {
            Ok(state) => {
                *phase = LockPhase::Held {
                    state,
                    holders: 1,
                    dirty: false,
                };
                Ok(())
            }
            Err(err) => {
                *phase = LockPhase::Unlocked;
                Err(err)
            }
        };
        self.phase_changed.notify_all();
        outcome
    }

    fn acquire_with_backoff(&self, started: Instant, deadline: Instant) -> Result<LockState> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            if let Some(state) = self.lock.try_acquire()? {
                tracing::trace!(
                    cache_id = %self.cache_id,
                    lock = %self.lock.display_name(),
                    %state,
                    attempts,
                    "Acquired cross-process lock"
                );
                return Ok(state);
            }

            let now = Instant::now();
            if now >= deadline || !self.retry.allows_retry(attempts) {
                let err = self.timeout(started.elapsed(), attempts);
                tracing::warn!(cache_id = %self.cache_id, error = %err, "Gave up waiting for cache lock");
                return Err(err);
            }

            let delay = self
                .retry
                .calculate_delay(attempts - 1)
                .min(deadline.saturating_duration_since(now));
            tracing::debug!(
                cache_id = %self.cache_id,
                lock = %self.lock.display_name(),
                attempts,
                ?delay,
                "Cache lock busy, retrying"
            );
            thread::sleep(delay);
        }
    }

    fn exit(&self, mutated: bool) -> Result<()> {
        let mut phase = self.phase.lock();
        let (state, dirty) = match &mut *phase {
            LockPhase::Held {
                state,
                holders,
                dirty,
            } => {
                *dirty |= mutated;
                *holders -= 1;
                if *holders > 0 {
                    return Ok(());
                }
                (*state, *dirty)
            }
            _ => {
                return Err(Error::LockNotHeld {
                    lock: self.lock.display_name(),
                })
            }
        };
        *phase = LockPhase::Releasing;
        drop(phase);

        // Another process may take the lock as soon as it is released, so the
        // backing store has to be complete before then.
        let flushed = self.inner.finish_work();
        let published = if dirty { state.next() } else { state };
        self.token.record_release(published);
        self.inner.before_lock_release(published);
        let released = self.lock.release(published);

        tracing::trace!(
            cache_id = %self.cache_id,
            acquired = %state,
            %published,
            "Released cross-process lock"
        );

        *self.phase.lock() = LockPhase::Unlocked;
        self.phase_changed.notify_all();
        flushed.and(released)
    }

    fn timeout(&self, waited: Duration, attempts: u32) -> Error {
        Error::LockTimeout {
            lock: self.lock.display_name(),
            waited,
            attempts,
        }
    }
}

impl<K: CacheKey, V: CacheValue> PersistentIndexedCache<K, V>
    for CrossProcessSynchronizingCache<K, V>
{
    fn get(&self, key: &K) -> Result<Option<V>> {
        self.with_file_lock(false, || self.inner.get(key))
    }

    fn put(&self, key: K, value: V) -> Result<()> {
        self.with_file_lock(true, || self.inner.put(key, value))
    }

    fn remove(&self, key: &K) -> Result<()> {
        self.with_file_lock(true, || self.inner.remove(key))
    }
}

impl<K: CacheKey, V: CacheValue> std::fmt::Debug for CrossProcessSynchronizingCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossProcessSynchronizingCache")
            .field("cache_id", &self.cache_id)
            .field("lock", &self.lock.display_name())
            .field("phase", &*self.phase.lock())
            .finish()
    }
}
