//! Error types for FOLIO operations

use crate::{EntityKind, PayloadChannel};
use thiserror::Error;
use uuid::Uuid;

/// Codec errors raised while encoding or decoding cache payloads.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// A serializer was handed the payload channel it does not support.
    /// This is a wiring bug, never a data problem.
    #[error("Configuration mismatch: {serializer} serializer expects a {expected} payload, got {got}")]
    ConfigurationMismatch {
        serializer: &'static str,
        expected: PayloadChannel,
        got: PayloadChannel,
    },

    #[error("Corrupt payload: {reason}")]
    CorruptPayload { reason: String },

    #[error("Payload declares {declared} bytes, limit is {limit}")]
    PayloadTooLarge { declared: usize, limit: usize },

    #[error("Serialization fault: {reason}")]
    SerializationFault { reason: String },
}

impl CodecError {
    /// Build a corrupt-payload error from any displayable cause.
    pub fn corrupt(reason: impl std::fmt::Display) -> Self {
        Self::CorruptPayload {
            reason: reason.to_string(),
        }
    }

    /// Build an encode-side fault from any displayable cause.
    pub fn fault(reason: impl std::fmt::Display) -> Self {
        Self::SerializationFault {
            reason: reason.to_string(),
        }
    }

    /// True for failures that the read path degrades to "no data".
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CodecError::CorruptPayload { .. } | CodecError::PayloadTooLarge { .. }
        )
    }
}

/// Cache tier errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache tier unavailable: {reason}")]
    TierUnavailable { reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Source of truth failed to load {entity_kind:?} {key}: {reason}")]
    SourceFailed {
        entity_kind: EntityKind,
        key: Uuid,
        reason: String,
    },

    #[error("Cache lock poisoned")]
    LockPoisoned,
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

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },

    #[error("Failed to parse settings: {reason}")]
    Parse { reason: String },
}

/// Master error type for all FOLIO errors.
#[derive(Debug, Clone, Error)]
pub enum FolioError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for FOLIO operations.
pub type FolioResult<T> = Result<T, FolioError>;

// =============================================================================
// TESTS
// =============================================================================
