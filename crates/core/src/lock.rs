//! Cross-process lock contract
//!
//! The lock itself is provided by an external collaborator (a file lock shared
//! by every process using the same on-disk store). The caching tier only needs
//! two things from it: a way to take ownership, returning the state the
//! previous owner left behind, and a way to give ownership back while
//! publishing a new state.

use crate::errors::Result;
use std::fmt;

/// Opaque marker describing the last published state of a shared store.
///
/// Two states compare equal exactly when no owner has published a change in
/// between, which is what the in-memory layer uses to decide whether its
/// contents still reflect the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockState {
    version: u64,
}

impl LockState {
    /// State of a store nobody has written to yet
    pub const INITIAL: LockState = LockState { version: 0 };

    pub const fn from_version(version: u64) -> Self {
        Self { version }
    }

    pub const fn version(&self) -> u64 {
        self.version
    }

    /// The state to publish after mutating the store
    #[must_use]
    pub const fn next(&self) -> Self {
        Self {
            version: self.version.wrapping_add(1),
        }
    }

    pub fn has_been_updated_since(&self, previous: &LockState) -> bool {
        self != previous
    }
}

impl Default for LockState {
    fn default() -> Self {
        Self::INITIAL
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.version)
    }
}

/// Cooperative lock shared between processes
pub trait CrossProcessLock: Send + Sync {
    /// Try to take the lock without waiting.
    ///
    /// Returns `Ok(None)` when another owner currently holds it; callers are
    /// expected to back off and retry.
    fn try_acquire(&self) -> Result<Option<LockState>>;

    /// Give the lock back, publishing `new_state` for the next owner
    fn release(&self, new_state: LockState) -> Result<()>;

    /// Human readable name used in logs and errors
    fn display_name(&self) -> String;
}
