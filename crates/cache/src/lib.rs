//! In-process caching tier for cachetier
//!
//! Sits between callers and a persistent indexed store that several processes
//! share. Each decorated cache is a pipeline of three layers:
//!
//! - **Cross-process synchronisation**: acquires the shared lock for every
//!   operation (or a whole unit of work) and detects changes made by other
//!   processes.
//! - **In-memory**: an LRU store shared by every pipeline with the same cache
//!   identifier, dropped whenever another process touched the backing store.
//! - **Write-behind**: applies writes on a background worker, serving reads of
//!   queued values until they land.
//!
//! [`InMemoryCacheDecoratorFactory`] builds these pipelines, sizing each
//! in-memory store from the process's memory budget. The [`origin`] module
//! records which build produced a cached entity.

pub mod config;
pub mod cross_process;
pub mod decorator;
pub mod eviction;
pub mod in_memory;
pub mod origin;
pub mod registry;
pub mod sizer;
pub mod store;
pub mod token;
pub mod traits;
pub mod write_behind;

#[cfg(test)]
mod tests;

pub use config::{CacheTierSettings, CacheTierSettingsBuilder, CacheTierSettingsLoader};
pub use cross_process::CrossProcessSynchronizingCache;
pub use decorator::{CacheDecorator, InMemoryCacheDecoratorFactory};
pub use eviction::{EvictionCause, EvictionEvent, EvictionObserver, EvictionSink};
pub use in_memory::InMemoryDecoratedCache;
pub use origin::{OriginMetadata, OriginMetadataFactory, OriginReader, OriginWriter};
pub use registry::{CacheDetails, CacheRegistry};
pub use sizer::{HeapProportionalCacheSizer, MemoryBudget};
pub use store::{FillGuard, InMemoryStore, StoreStats};
pub use token::{InvalidationToken, TokenState};
pub use traits::{CacheKey, CacheValue, LockAwareCache, PersistentIndexedCache};
pub use write_behind::AsyncWriteBehindCache;

pub use cachetier_core::{CrossProcessLock, Error, LockState, RecoveryHint, Result};
