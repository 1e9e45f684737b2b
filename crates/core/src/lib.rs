//! Core domain types, errors, and constants for `cachetier`.
//!
//! ## Key Components
//!
//! - **`errors`**: the `Error` enum and `Result` alias shared by every layer,
//!   with a `RecoveryHint` per failure mode.
//! - **`lock`**: the contract of the cross-process lock guarding the on-disk
//!   store, and the `LockState` token it hands out.
//! - **`constants`**: environment variable names and sizing defaults.

pub mod constants;
pub mod errors;
pub mod lock;

pub use self::{
    constants::*,
    errors::{Error, RecoveryHint, Result},
    lock::{CrossProcessLock, LockState},
};
