//! Error types for the events crate.

use std::fmt;

/// Result type alias for event operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Event error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Event store operation failed.
    StoreFailed { operation: String, reason: String },
    /// Invalid bus or event configuration.
    InvalidConfig { reason: String },
    /// Subscriber fell behind and missed events.
    Lagged { skipped: u64 },
    /// Channel closed.
    ChannelClosed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StoreFailed { operation, reason } => {
                write!(f, "event store operation '{operation}' failed: {reason}")
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid event bus configuration: {reason}")
            }
            Self::Lagged { skipped } => {
                write!(f, "subscriber lagged behind by {skipped} events")
            }
            Self::ChannelClosed => {
                write!(f, "event channel closed")
            }
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Create a store failed error.
    pub fn store_failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StoreFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}
