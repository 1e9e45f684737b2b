//! Core error type definitions

use std::path::PathBuf;
use std::time::Duration;

/// Result type alias for cachetier operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the caching tier using thiserror
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An existing cache identifier was requested with a different in-memory size
    #[error(
        "mismatched in-memory store size for cache '{cache_id}': registered with {registered} entries, requested {requested}"
    )]
    ConfigurationMismatch {
        cache_id: String,
        registered: usize,
        requested: usize,
    },

    /// An existing cache identifier was requested with different key/value types
    #[error("cache '{cache_id}' is already registered with different key or value types")]
    StoreTypeMismatch { cache_id: String },

    /// Invalid settings or arguments
    #[error("invalid cache configuration: {message}")]
    InvalidConfiguration { message: String },

    /// The cross-process lock could not be acquired in time
    #[error("timeout waiting for lock on {lock} after {waited:?} ({attempts} attempts)")]
    LockTimeout {
        lock: String,
        waited: Duration,
        attempts: u32,
    },

    /// Release requested while no unit of work holds the lock
    #[error("lock on {lock} released without being held")]
    LockNotHeld { lock: String },

    /// Origin metadata is missing required fields or is malformed
    #[error("cached result format error, corrupted origin metadata for {entity}: {reason}")]
    CorruptedOriginMetadata { entity: String, reason: String },

    /// Failure reported by the persistent backing store
    #[error("backing store failed during {operation}: {message}")]
    BackingStore {
        operation: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A deferred write could not be applied to the backing store
    #[error("asynchronous write of key {key} to cache '{cache_id}' failed")]
    AsyncWriteFailed {
        cache_id: String,
        key: String,
        #[source]
        source: Box<Error>,
    },

    /// Pending writes were not drained within the bounded wait
    #[error("timeout flushing pending writes of cache '{cache_id}' after {waited:?}")]
    FlushTimeout { cache_id: String, waited: Duration },

    /// The write-behind worker has stopped
    #[error("write-behind worker for cache '{cache_id}' is no longer running")]
    WorkerUnavailable { cache_id: String },

    /// File system operations
    #[error("I/O error during {operation} on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Recovery hints for error handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryHint {
    /// Programmer or configuration error, fix the caller
    FixConfiguration,

    /// Retry the whole operation, possibly after a delay
    Retry,

    /// Treat the entry as a cache miss and recompute
    TreatAsMiss,

    /// Inspect the backing store, nothing can be done automatically
    CheckBackingStore,

    /// Check file permissions and disk space
    CheckFileSystem,
}
