//! Quota Error Types
//!
//! Only a few of these ever reach a caller. Storage and validation failures
//! are recovered inside the replicator and only show up in debug logs.

/// Failure of a single storage location
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Location refused the operation (quota exceeded, disabled, sandboxed)
    #[error("Storage location '{key}' unavailable: {reason}")]
    Unavailable { key: String, reason: String },

    /// Location is mounted read-only
    #[error("Storage location '{0}' is read-only")]
    ReadOnly(String),

    /// Filesystem error
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reason a candidate record failed the integrity check
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Record is not an object")]
    NotAnObject,

    #[error("Record is missing field '{0}'")]
    MissingField(&'static str),

    #[error("Record field '{0}' has the wrong type")]
    MistypedField(&'static str),

    #[error("Record field '{0}' is in the future")]
    FutureTimestamp(&'static str),

    #[error("Record field '{0}' is older than the lookback horizon")]
    StaleTimestamp(&'static str),

    #[error("Record could not be decoded: {0}")]
    Decode(String),
}

/// Error types for quota operations
#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    /// A storage location could not be read or written
    #[error(transparent)]
    StorageUnavailable(#[from] StorageError),

    /// A persisted record failed validation
    #[error("Malformed usage record: {0}")]
    MalformedRecord(#[from] ValidationError),

    /// A structurally valid record belongs to another client
    #[error("Record signature {found} does not match client signature {expected}")]
    SignatureMismatch { expected: String, found: String },

    /// A use was attempted too soon after the previous one
    #[error("Rapid replay: previous use was {elapsed_ms}ms ago")]
    RapidReplay { elapsed_ms: i64 },

    /// Override secret did not match the configured credential
    #[error("Invalid override credential")]
    InvalidOverrideCredential,

    /// Configuration rejected by validation
    #[error("Invalid quota configuration: {0}")]
    InvalidConfig(String),
}
