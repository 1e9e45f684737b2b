//! Test doubles for the backing store and the cross-process lock

use crate::config::CacheTierSettings;
use crate::traits::PersistentIndexedCache;
use cachetier_core::{CrossProcessLock, Error, LockState, Result};
use cachetier_utils::RetryConfig;
use parking_lot::{Condvar, Mutex};
use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Settings that size caches 1:1 with their reference values and keep
/// lock waits short
pub fn reference_settings() -> CacheTierSettings {
    CacheTierSettings::builder()
        .with_max_heap_mb(910)
        .with_lock_timeout(Duration::from_secs(5))
        .with_lock_retry(RetryConfig::immediate(10_000))
        .with_flush_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// In-memory backing store that counts calls and can be made to stall or fail
pub struct RecordingStore<K, V> {
    entries: Mutex<HashMap<K, V>>,
    gets: AtomicUsize,
    puts: AtomicUsize,
    removes: AtomicUsize,
    failing_puts: Mutex<HashSet<K>>,
    writes_blocked: Mutex<bool>,
    writes_unblocked: Condvar,
    reads_blocked: Mutex<bool>,
    reads_unblocked: Condvar,
    stalled_reads: AtomicUsize,
}

impl<K: Eq + Hash + Clone + std::fmt::Debug, V: Clone> RecordingStore<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
            failing_puts: Mutex::new(HashSet::new()),
            writes_blocked: Mutex::new(false),
            writes_unblocked: Condvar::new(),
            reads_blocked: Mutex::new(false),
            reads_unblocked: Condvar::new(),
            stalled_reads: AtomicUsize::new(0),
        }
    }

    /// Write directly, as another process would
    pub fn seed(&self, key: K, value: V) {
        self.entries.lock().insert(key, value);
    }

    /// Current contents without counting a read
    pub fn snapshot<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn removes(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }

    pub fn fail_puts_for(&self, key: impl Into<K>) {
        self.failing_puts.lock().insert(key.into());
    }

    pub fn allow_puts_for(&self, key: impl Into<K>) {
        let key: K = key.into();
        self.failing_puts.lock().remove(&key);
    }

    /// Stall every read after it has looked up its value, until
    /// [`RecordingStore::unblock_reads`]
    pub fn block_reads(&self) {
        *self.reads_blocked.lock() = true;
    }

    pub fn unblock_reads(&self) {
        *self.reads_blocked.lock() = false;
        self.reads_unblocked.notify_all();
    }

    /// Reads currently stalled by [`RecordingStore::block_reads`]
    pub fn stalled_reads(&self) -> usize {
        self.stalled_reads.load(Ordering::SeqCst)
    }

    /// Spin until `count` reads are stalled
    pub fn wait_for_stalled_reads(&self, count: usize) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while self.stalled_reads() < count {
            assert!(std::time::Instant::now() < deadline, "reads never stalled");
            std::thread::yield_now();
        }
    }

    fn wait_for_reads(&self) {
        let mut blocked = self.reads_blocked.lock();
        if !*blocked {
            return;
        }
        self.stalled_reads.fetch_add(1, Ordering::SeqCst);
        while *blocked {
            self.reads_unblocked.wait(&mut blocked);
        }
        self.stalled_reads.fetch_sub(1, Ordering::SeqCst);
    }

    /// Stall every write until [`RecordingStore::unblock_writes`]
    pub fn block_writes(&self) {
        *self.writes_blocked.lock() = true;
    }

    pub fn unblock_writes(&self) {
        *self.writes_blocked.lock() = false;
        self.writes_unblocked.notify_all();
    }

    fn wait_for_writes(&self) {
        let mut blocked = self.writes_blocked.lock();
        while *blocked {
            self.writes_unblocked.wait(&mut blocked);
        }
    }
}

impl<K, V> PersistentIndexedCache<K, V> for RecordingStore<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Result<Option<V>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let value = self.entries.lock().get(key).cloned();
        self.wait_for_reads();
        Ok(value)
    }

    fn put(&self, key: K, value: V) -> Result<()> {
        self.wait_for_writes();
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.failing_puts.lock().contains(&key) {
            return Err(Error::backing_store("put", format!("disk rejected {key:?}")));
        }
        self.entries.lock().insert(key, value);
        Ok(())
    }

    fn remove(&self, key: &K) -> Result<()> {
        self.wait_for_writes();
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().remove(key);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct LockFileState {
    version: u64,
    held: bool,
    held_elsewhere: bool,
    acquisitions: usize,
}

/// Lock whose published version can also be changed by a simulated second
/// process
#[derive(Debug, Default)]
pub struct SharedVersionLock {
    file: Mutex<LockFileState>,
}

impl SharedVersionLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquisitions(&self) -> usize {
        self.file.lock().acquisitions
    }

    pub fn version(&self) -> u64 {
        self.file.lock().version
    }

    pub fn is_locked(&self) -> bool {
        let file = self.file.lock();
        file.held || file.held_elsewhere
    }

    /// Another process takes the lock, writes, and publishes a new version
    pub fn simulate_external_write(&self) {
        self.file.lock().version += 1;
    }

    pub fn hold_elsewhere(&self) {
        self.file.lock().held_elsewhere = true;
    }

    pub fn release_elsewhere(&self) {
        self.file.lock().held_elsewhere = false;
    }
}

impl CrossProcessLock for SharedVersionLock {
    fn try_acquire(&self) -> Result<Option<LockState>> {
        let mut file = self.file.lock();
        if file.held || file.held_elsewhere {
            return Ok(None);
        }
        file.held = true;
        file.acquisitions += 1;
        Ok(Some(LockState::from_version(file.version)))
    }

    fn release(&self, new_state: LockState) -> Result<()> {
        let mut file = self.file.lock();
        if !file.held {
            return Err(Error::LockNotHeld {
                lock: self.display_name(),
            });
        }
        file.version = new_state.version();
        file.held = false;
        Ok(())
    }

    fn display_name(&self) -> String {
        "shared-version.lock".to_string()
    }
}
