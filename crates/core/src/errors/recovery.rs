//! Recovery classification for cache errors

use super::types::{Error, RecoveryHint};

impl Error {
    /// Get the recovery hint for this error
    #[must_use]
    pub fn recovery_hint(&self) -> RecoveryHint {
        match self {
            Self::ConfigurationMismatch { .. }
            | Self::StoreTypeMismatch { .. }
            | Self::InvalidConfiguration { .. }
            | Self::LockNotHeld { .. }
            | Self::Json { .. } => RecoveryHint::FixConfiguration,
            Self::LockTimeout { .. } | Self::FlushTimeout { .. } => RecoveryHint::Retry,
            Self::CorruptedOriginMetadata { .. } => RecoveryHint::TreatAsMiss,
            Self::BackingStore { .. }
            | Self::AsyncWriteFailed { .. }
            | Self::WorkerUnavailable { .. } => RecoveryHint::CheckBackingStore,
            Self::Io { .. } => RecoveryHint::CheckFileSystem,
        }
    }

    /// Check if this error is transient and the operation can be retried
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.recovery_hint() == RecoveryHint::Retry
    }

    /// Check if the caller should degrade this error to a cache miss
    #[must_use]
    pub fn is_cache_miss(&self) -> bool {
        self.recovery_hint() == RecoveryHint::TreatAsMiss
    }
}
