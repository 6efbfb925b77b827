//! Error types for Memelab cache operations

use thiserror::Error;

/// Persistent-tier errors.
///
/// None of these ever reach a caller of the cache's read or write path; they
/// are logged and the cache degrades to its memory tier. They are surfaced
/// directly only by the store implementations and by maintenance calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Persistent store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Query failed on {operation}: {reason}")]
    QueryFailed { operation: String, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Serialization failed for {cache_key}: {reason}")]
    Serialization { cache_key: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Input validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("TTL policy for {tool} is not monotonic: free={free_mins}m premium={premium_mins}m enterprise={enterprise_mins}m")]
    NonMonotonicTtl {
        tool: String,
        free_mins: u64,
        premium_mins: u64,
        enterprise_mins: u64,
    },
}

/// Master error type for all Memelab errors.
#[derive(Debug, Clone, Error)]
pub enum MemelabError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl MemelabError {
    /// True for the persistence failures the cache swallows.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// True for rejected caller input.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Result type alias for Memelab operations.
pub type MemelabResult<T> = Result<T, MemelabError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_unavailable() {
        let err = StorageError::Unavailable {
            reason: "connection refused".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("unavailable"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_config_error_display_non_monotonic() {
        let err = ConfigError::NonMonotonicTtl {
            tool: "trending".to_string(),
            free_mins: 5,
            premium_mins: 60,
            enterprise_mins: 1,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("trending"));
        assert!(msg.contains("free=5m"));
        assert!(msg.contains("premium=60m"));
    }

    #[test]
    fn test_master_error_classification() {
        let storage: MemelabError = StorageError::LockPoisoned.into();
        assert!(storage.is_persistence());
        assert!(!storage.is_invalid_input());

        let validation: MemelabError = ValidationError::RequiredFieldMissing {
            field: "tool".to_string(),
        }
        .into();
        assert!(validation.is_invalid_input());
        assert!(!validation.is_persistence());
    }

    #[test]
    fn test_master_error_wraps_display() {
        let err: MemelabError = ValidationError::InvalidValue {
            field: "tool".to_string(),
            reason: "must not contain ':'".to_string(),
        }
        .into();
        let msg = format!("{}", err);
        assert!(msg.starts_with("Validation error:"));
        assert!(msg.contains("must not contain ':'"));
    }
}
