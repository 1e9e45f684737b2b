//! Many worker threads hitting the registry and decorated caches at once

use super::support::{reference_settings, RecordingStore, SharedVersionLock};
use crate::decorator::InMemoryCacheDecoratorFactory;
use crate::eviction::EvictionObserver;
use crate::registry::{CacheDetails, CacheRegistry};
use crate::store::InMemoryStore;
use crate::traits::PersistentIndexedCache;
use cachetier_core::Error;
use crossbeam::channel;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const THREADS: usize = 16;

#[test]
fn test_concurrent_first_access_creates_one_store() {
    let registry = Arc::new(CacheRegistry::new());
    let observer = Arc::new(EvictionObserver::new().unwrap());
    let creations = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let observer = Arc::clone(&observer);
            let creations = Arc::clone(&creations);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                registry
                    .get_or_create::<String, u64, _>("fileHashes", 500, || {
                        creations.fetch_add(1, Ordering::SeqCst);
                        // Make the window for a second creation wide
                        thread::sleep(Duration::from_millis(20));
                        let store = InMemoryStore::new("fileHashes", 500, observer.sink())?;
                        Ok(CacheDetails::new("fileHashes", 500, store))
                    })
                    .unwrap()
            })
        })
        .collect();

    let details: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(creations.load(Ordering::SeqCst), 1);
    assert_eq!(details.len(), THREADS);
    assert!(details.iter().all(|d| Arc::ptr_eq(d, &details[0])));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_concurrent_writers_read_their_own_writes() {
    let factory = InMemoryCacheDecoratorFactory::new(
        true,
        reference_settings(),
        Arc::new(CacheRegistry::new()),
    )
    .unwrap();
    let backing = Arc::new(RecordingStore::<String, u32>::new());
    let lock = Arc::new(SharedVersionLock::new());
    let cache = Arc::new(
        factory
            .decorator(1000, false)
            .decorate::<String, u32>("outputs", backing.clone(), lock.clone())
            .unwrap(),
    );

    let handles: Vec<_> = (0..THREADS)
        .map(|worker| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..50u32 {
                    let key = format!("{worker}-{i}");
                    cache.put(key.clone(), i).unwrap();
                    assert_eq!(cache.get(&key).unwrap(), Some(i));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(!cache.is_held());
    assert!(!lock.is_locked());
    assert_eq!(backing.len(), THREADS * 50);
    assert_eq!(backing.snapshot("3-49"), Some(49));
}

#[test]
fn test_read_through_racing_a_write_keeps_the_write() {
    let factory = InMemoryCacheDecoratorFactory::new(
        true,
        reference_settings(),
        Arc::new(CacheRegistry::new()),
    )
    .unwrap();
    let backing = Arc::new(RecordingStore::<String, u32>::new());
    backing.seed("k".to_string(), 1);
    let cache = factory
        .decorator(100, false)
        .decorate::<String, u32>("outputs", backing.clone(), Arc::new(SharedVersionLock::new()))
        .unwrap();

    backing.block_reads();
    thread::scope(|scope| {
        let reader = scope.spawn(|| cache.get(&"k".to_string()));
        backing.wait_for_stalled_reads(1);

        // Joins the reader's hold, so it does not wait for the lock
        cache.put("k".to_string(), 2).unwrap();
        backing.unblock_reads();

        assert_eq!(reader.join().unwrap().unwrap(), Some(1));
    });

    let details = factory
        .registry()
        .get_or_create::<String, u32, _>("outputs", 100, || {
            Err(Error::configuration("store should already exist"))
        })
        .unwrap();
    assert_eq!(details.store.get(&"k".to_string()), Some(2));
    assert_eq!(cache.get(&"k".to_string()).unwrap(), Some(2));
    assert_eq!(backing.snapshot("k"), Some(2));
}

#[test]
fn test_operations_from_other_threads_join_a_unit_of_work() {
    let factory = InMemoryCacheDecoratorFactory::new(
        true,
        reference_settings(),
        Arc::new(CacheRegistry::new()),
    )
    .unwrap();
    let backing = Arc::new(RecordingStore::<String, u32>::new());
    let lock = Arc::new(SharedVersionLock::new());
    let cache = Arc::new(
        factory
            .decorator(100, false)
            .decorate::<String, u32>("outputs", backing.clone(), lock.clone())
            .unwrap(),
    );

    let (held_tx, held_rx) = channel::bounded::<()>(1);
    let (done_tx, done_rx) = channel::bounded::<()>(1);

    let helper = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
            held_rx.recv().unwrap();
            cache.put("from-helper".to_string(), 2).unwrap();
            done_tx.send(()).unwrap();
        })
    };

    cache
        .unit_of_work(|cache| {
            cache.put("from-owner".to_string(), 1)?;
            held_tx.send(()).unwrap();
            done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert!(cache.is_held());
            Ok(())
        })
        .unwrap();
    helper.join().unwrap();

    assert_eq!(lock.acquisitions(), 1);
    assert_eq!(lock.version(), 1);
    assert_eq!(backing.snapshot("from-owner"), Some(1));
    assert_eq!(backing.snapshot("from-helper"), Some(2));
}

#[test]
fn test_waiters_time_out_while_another_thread_acquires() {
    let settings = crate::config::CacheTierSettings::builder()
        .with_max_heap_mb(910)
        .with_lock_timeout(Duration::from_millis(100))
        .with_lock_retry(cachetier_utils::RetryConfig::immediate(10_000))
        .build()
        .unwrap();
    let factory =
        InMemoryCacheDecoratorFactory::new(true, settings, Arc::new(CacheRegistry::new())).unwrap();
    let lock = Arc::new(SharedVersionLock::new());
    lock.hold_elsewhere();
    let cache = Arc::new(
        factory
            .decorator(100, false)
            .decorate::<String, u32>(
                "outputs",
                Arc::new(RecordingStore::<String, u32>::new()),
                lock.clone(),
            )
            .unwrap(),
    );

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get(&"k".to_string()))
        })
        .collect();
    for handle in handles {
        let err = handle.join().unwrap().unwrap_err();
        assert!(err.is_transient(), "unexpected error: {err}");
    }

    assert!(!cache.is_held());
    lock.release_elsewhere();
    assert_eq!(cache.get(&"k".to_string()).unwrap(), None);
}
