//! Error types for the MAuth core.

/// Core error type for MAuth configuration and protocol constants.
#[derive(Debug, thiserror::Error)]
pub enum MAuthError {
    /// A scheme token or version name that no protocol version recognizes.
    #[error("unsupported MAuth protocol version: {0}")]
    UnsupportedVersion(String),

    /// A required configuration value is absent.
    #[error("missing configuration value: {0}")]
    MissingConfig(&'static str),

    /// A configuration value is present but cannot be used.
    #[error("invalid configuration value for {name}: {reason}")]
    InvalidConfig {
        /// The configuration key.
        name: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Convenience result type for MAuth core operations.
pub type MAuthResult<T> = Result<T, MAuthError>;
