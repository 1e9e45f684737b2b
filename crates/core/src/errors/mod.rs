//! Error types and recovery classification for cachetier operations

mod builders;
mod conversions;
mod recovery;
mod types;

pub use types::{Error, RecoveryHint, Result};
