//! Shared utilities for cachetier
//!
//! Process-level plumbing used by the caching tier: log initialisation,
//! backoff policies, the file lock shared between processes, and lookups of
//! the host and user identity.

pub mod file_lock;
pub mod identity;
pub mod logging;
pub mod retry;

pub use file_lock::FileLock;
pub use retry::RetryConfig;
