//! Diagnostics for entries evicted from in-memory stores
//!
//! Evictions happen inside whichever thread mutated a store. Rather than run
//! listeners there, stores push an event onto an unbounded channel and a
//! dedicated observer thread does the bookkeeping, logging, and fan-out.
//! Nothing here affects correctness; a dropped event only loses a log line.

use crate::store::StoreStats;
use crossbeam::channel::{self, Receiver, Sender};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::thread;

const EVICTION_MITIGATION_MESSAGE: &str =
    "Performance may suffer from in-memory cache misses. Increase the memory available to the build process to reduce cache misses.";

/// Why an entry left a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionCause {
    /// The store was at capacity and the least recently used entry made room
    Size,
}

/// One evicted entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionEvent {
    pub cache_id: String,
    /// Debug rendering of the evicted key
    pub key: String,
    pub cause: EvictionCause,
    /// Store size right after the eviction
    pub size: usize,
    pub max_size: usize,
    /// Store counters including this eviction
    pub stats: StoreStats,
}

/// Sending half handed to stores; never blocks
#[derive(Debug, Clone)]
pub struct EvictionSink {
    sender: Sender<EvictionEvent>,
}

impl EvictionSink {
    pub fn notify(&self, event: EvictionEvent) {
        // Only fails once the observer thread is gone, at which point there
        // is nobody left to tell.
        let _ = self.sender.send(event);
    }
}

#[derive(Default)]
struct ObserverShared {
    counts: DashMap<String, u64>,
    subscribers: RwLock<Vec<Sender<EvictionEvent>>>,
}

/// Records eviction events from every store created through one registry
pub struct EvictionObserver {
    sink: EvictionSink,
    shared: Arc<ObserverShared>,
}

impl EvictionObserver {
    /// Start the observer thread
    pub fn new() -> std::io::Result<Self> {
        let (sender, receiver) = channel::unbounded();
        let shared = Arc::new(ObserverShared::default());

        let worker_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("cachetier-evictions".to_string())
            .spawn(move || run(receiver, worker_shared))?;

        Ok(Self {
            sink: EvictionSink { sender },
            shared,
        })
    }

    pub fn sink(&self) -> EvictionSink {
        self.sink.clone()
    }

    /// Receive a copy of every event processed from now on
    pub fn subscribe(&self) -> Receiver<EvictionEvent> {
        let (sender, receiver) = channel::unbounded();
        self.shared.subscribers.write().push(sender);
        receiver
    }

    /// Evictions processed so far for `cache_id`
    pub fn evictions(&self, cache_id: &str) -> u64 {
        self.shared
            .counts
            .get(cache_id)
            .map(|count| *count)
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for EvictionObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvictionObserver")
            .field("caches", &self.shared.counts.len())
            .finish()
    }
}

fn run(receiver: Receiver<EvictionEvent>, shared: Arc<ObserverShared>) {
    // Exits once the observer and every store holding a sink are dropped
    for event in receiver.iter() {
        let count = {
            let mut count = shared.counts.entry(event.cache_id.clone()).or_insert(0);
            *count += 1;
            *count
        };

        let log_interval = (event.max_size / 10).max(1) as u64;
        if (count - 1) % log_interval == 0 {
            tracing::info!(
                cache_id = %event.cache_id,
                size = event.size,
                max_size = event.max_size,
                evictions = count,
                hits = event.stats.hits,
                misses = event.stats.misses,
                "Cache entries evicted. In-memory cache of {}: Size{{{}}} MaxSize{{{}}}, Hits{{{}}} Misses{{{}}} HitRate{{{:.2}}} Evictions{{{}}}. {}",
                event.cache_id,
                event.size,
                event.max_size,
                event.stats.hits,
                event.stats.misses,
                event.stats.hit_rate(),
                count,
                EVICTION_MITIGATION_MESSAGE
            );
        } else {
            tracing::trace!(cache_id = %event.cache_id, key = %event.key, "Evicted entry");
        }

        let mut subscribers = shared.subscribers.write();
        if !subscribers.is_empty() {
            subscribers.retain(|subscriber| subscriber.send(event.clone()).is_ok());
        }
    }
}
