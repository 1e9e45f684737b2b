//! Asynchronous write-behind in front of the backing store
//!
//! Writes are acknowledged as soon as they are queued. A single worker thread
//! per instance applies them to the backing store in enqueue order, which
//! keeps per-key ordering without any per-key bookkeeping on the worker side.
//! Until a write has been applied it stays visible to reads through the
//! pending map, so a caller always reads its own writes.

use crate::traits::{CacheKey, CacheValue, LockAwareCache, PersistentIndexedCache};
use cachetier_core::{Error, Result};
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

enum WriteCommand<K, V> {
    Put { key: K, value: V, seq: u64 },
    Remove { key: K, seq: u64 },
    Flush(Sender<()>),
    Stop,
}

/// Latest queued write for a key; `value` is `None` for a queued removal
struct PendingWrite<V> {
    seq: u64,
    value: Option<V>,
}

struct WriteBehindState<K: CacheKey, V: CacheValue> {
    cache_id: String,
    backing: Arc<dyn PersistentIndexedCache<K, V>>,
    pending: DashMap<K, PendingWrite<V>>,
    failures: DashMap<K, Error>,
}

impl<K: CacheKey, V: CacheValue> WriteBehindState<K, V> {
    fn complete(&self, key: K, seq: u64, operation: &str, result: Result<()>) {
        match result {
            // Writes apply in order, so this one supersedes any earlier failure
            Ok(()) => {
                self.failures.remove(&key);
            }
            Err(err) => {
                tracing::warn!(
                    cache_id = %self.cache_id,
                    key = ?key,
                    operation,
                    error = %err,
                    "Asynchronous cache write failed"
                );
                // Record before dropping the pending entry so readers never see neither
                self.failures.insert(key.clone(), err);
            }
        }
        self.pending.remove_if(&key, |_, pending| pending.seq == seq);
    }

    fn take_failure(&self, key: &K) -> Result<()> {
        match self.failures.remove(key) {
            Some((key, source)) => Err(Error::AsyncWriteFailed {
                cache_id: self.cache_id.clone(),
                key: format!("{key:?}"),
                source: Box::new(source),
            }),
            None => Ok(()),
        }
    }
}

/// Write-behind layer with one worker thread per instance
pub struct AsyncWriteBehindCache<K: CacheKey, V: CacheValue> {
    state: Arc<WriteBehindState<K, V>>,
    sender: Sender<WriteCommand<K, V>>,
    next_seq: AtomicU64,
    flush_timeout: Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<K: CacheKey, V: CacheValue> AsyncWriteBehindCache<K, V> {
    /// Start the worker for `backing`
    pub fn new(
        cache_id: impl Into<String>,
        backing: Arc<dyn PersistentIndexedCache<K, V>>,
        flush_timeout: Duration,
    ) -> Result<Self> {
        let cache_id = cache_id.into();
        let state = Arc::new(WriteBehindState {
            cache_id: cache_id.clone(),
            backing,
            pending: DashMap::new(),
            failures: DashMap::new(),
        });

        let (sender, receiver) = channel::unbounded::<WriteCommand<K, V>>();
        let worker_state = Arc::clone(&state);
        let worker = thread::Builder::new()
            .name(format!("cachetier-writer-{cache_id}"))
            .spawn(move || {
                for command in receiver.iter() {
                    match command {
                        WriteCommand::Put { key, value, seq } => {
                            let result = worker_state.backing.put(key.clone(), value);
                            worker_state.complete(key, seq, "put", result);
                        }
                        WriteCommand::Remove { key, seq } => {
                            let result = worker_state.backing.remove(&key);
                            worker_state.complete(key, seq, "remove", result);
                        }
                        WriteCommand::Flush(ack) => {
                            let _ = ack.send(());
                        }
                        WriteCommand::Stop => break,
                    }
                }
                tracing::trace!(cache_id = %worker_state.cache_id, "Write-behind worker stopped");
            })
            .map_err(|err| Error::io("", "spawn write-behind worker", err))?;

        Ok(Self {
            state,
            sender,
            next_seq: AtomicU64::new(0),
            flush_timeout,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn cache_id(&self) -> &str {
        &self.state.cache_id
    }

    /// Writes queued but not yet applied
    pub fn pending_writes(&self) -> usize {
        self.state.pending.len()
    }

    fn enqueue(&self, key: K, value: Option<V>) -> Result<()> {
        // Holding the key's entry across the send keeps the pending map and
        // the queue in the same order for that key.
        let entry = self.state.pending.entry(key.clone());
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let command = match &value {
            Some(value) => WriteCommand::Put {
                key,
                value: value.clone(),
                seq,
            },
            None => WriteCommand::Remove { key, seq },
        };

        self.sender
            .send(command)
            .map_err(|_| Error::WorkerUnavailable {
                cache_id: self.state.cache_id.clone(),
            })?;
        entry.insert(PendingWrite { seq, value });
        Ok(())
    }

    /// Block until everything queued so far has been applied
    pub fn flush(&self) -> Result<()> {
        let (ack, done) = channel::bounded(1);
        self.sender
            .send(WriteCommand::Flush(ack))
            .map_err(|_| self.worker_unavailable())?;

        match done.recv_timeout(self.flush_timeout) {
            Ok(()) => {}
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    cache_id = %self.state.cache_id,
                    pending = self.pending_writes(),
                    waited = ?self.flush_timeout,
                    "Timed out flushing pending cache writes"
                );
                return Err(Error::FlushTimeout {
                    cache_id: self.state.cache_id.clone(),
                    waited: self.flush_timeout,
                });
            }
            Err(RecvTimeoutError::Disconnected) => return Err(self.worker_unavailable()),
        }

        // Surface one recorded failure per flush; the rest stay for later reads
        let failed_key = self
            .state
            .failures
            .iter()
            .next()
            .map(|entry| entry.key().clone());
        match failed_key {
            Some(key) => self.state.take_failure(&key),
            None => Ok(()),
        }
    }

    fn worker_unavailable(&self) -> Error {
        Error::WorkerUnavailable {
            cache_id: self.state.cache_id.clone(),
        }
    }
}

impl<K: CacheKey, V: CacheValue> PersistentIndexedCache<K, V> for AsyncWriteBehindCache<K, V> {
    fn get(&self, key: &K) -> Result<Option<V>> {
        self.state.take_failure(key)?;

        if let Some(pending) = self.state.pending.get(key) {
            return Ok(pending.value.clone());
        }
        self.state.backing.get(key)
    }

    fn put(&self, key: K, value: V) -> Result<()> {
        self.enqueue(key, Some(value))
    }

    fn remove(&self, key: &K) -> Result<()> {
        self.enqueue(key.clone(), None)
    }
}

impl<K: CacheKey, V: CacheValue> LockAwareCache<K, V> for AsyncWriteBehindCache<K, V> {
    fn finish_work(&self) -> Result<()> {
        self.flush()
    }

    fn surface_failure(&self, key: &K) -> Result<()> {
        self.state.take_failure(key)
    }
}

impl<K: CacheKey, V: CacheValue> Drop for AsyncWriteBehindCache<K, V> {
    fn drop(&mut self) {
        let _ = self.sender.send(WriteCommand::Stop);
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::error!(cache_id = %self.state.cache_id, "Write-behind worker panicked");
            }
        }
    }
}

impl<K: CacheKey, V: CacheValue> std::fmt::Debug for AsyncWriteBehindCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncWriteBehindCache")
            .field("cache_id", &self.state.cache_id)
            .field("pending", &self.state.pending.len())
            .field("failures", &self.state.failures.len())
            .finish()
    }
}
