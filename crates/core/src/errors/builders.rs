//! Builder methods for creating errors with context

use super::types::Error;
use std::path::PathBuf;

impl Error {
    /// Create an invalid configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create a backing store error without an underlying cause
    #[must_use]
    pub fn backing_store(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::BackingStore {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a backing store error wrapping the store's own error
    #[must_use]
    pub fn backing_store_with_source(
        operation: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        let source = source.into();
        Error::BackingStore {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a corrupted origin metadata error
    #[must_use]
    pub fn corrupted_origin(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::CorruptedOriginMetadata {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        path: impl Into<PathBuf>,
        operation: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Error::Io {
            path: path.into(),
            operation: operation.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_backing_store_keeps_source() {
        let io = std::io::Error::other("disk on fire");
        let err = Error::backing_store_with_source("put", io);

        assert_eq!(
            err.to_string(),
            "backing store failed during put: disk on fire"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn test_mismatch_message_names_both_sizes() {
        let err = Error::ConfigurationMismatch {
            cache_id: "fileHashes".to_string(),
            registered: 100,
            requested: 200,
        };
        let message = err.to_string();

        assert!(message.contains("fileHashes"));
        assert!(message.contains("100"));
        assert!(message.contains("200"));
    }
}
