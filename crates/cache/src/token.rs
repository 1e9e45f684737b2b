//! Shared marker telling the in-memory layer whether its contents are still valid

use cachetier_core::LockState;
use crossbeam::atomic::AtomicCell;
use std::sync::Arc;

/// Snapshot of an [`InvalidationToken`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TokenState {
    /// Lock state last seen by this process, `None` before the first acquisition
    pub observed: Option<LockState>,
    /// Bumped every time the observed state changed behind this process's back
    pub generation: u64,
}

/// A single shared cell, written by the cross-process layer and read by the
/// in-memory layer.
///
/// The generation only moves when a freshly acquired lock carries a state
/// other than the one this process last saw, i.e. when another process (or a
/// previous build) may have changed the backing store. Publishing our own
/// state on release leaves the generation untouched.
#[derive(Debug, Clone, Default)]
pub struct InvalidationToken {
    cell: Arc<AtomicCell<TokenState>>,
}

impl InvalidationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TokenState {
        self.cell.load()
    }

    pub fn generation(&self) -> u64 {
        self.cell.load().generation
    }

    pub fn last_observed(&self) -> Option<LockState> {
        self.cell.load().observed
    }

    /// Record the state handed out by a lock acquisition.
    ///
    /// Returns `true` when it differs from the last observed state, in which
    /// case the generation has advanced and memory-resident data is stale.
    pub(crate) fn observe_acquired(&self, acquired: LockState) -> bool {
        let mut current = self.cell.load();
        loop {
            if current.observed == Some(acquired) {
                return false;
            }
            let next = TokenState {
                observed: Some(acquired),
                generation: current.generation.wrapping_add(1),
            };
            match self.cell.compare_exchange(current, next) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Record the state this process publishes when giving the lock back
    pub(crate) fn record_release(&self, published: LockState) {
        let mut current = self.cell.load();
        loop {
            let next = TokenState {
                observed: Some(published),
                generation: current.generation,
            };
            match self.cell.compare_exchange(current, next) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}
