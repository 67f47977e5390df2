//! Core error types for Guild operations.
//!
//! Every expected failure is a value. Nothing in the core aborts the process.

use std::path::PathBuf;

use thiserror::Error;

use crate::task::TaskStatus;

/// The standard Result type for Guild operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Guild operations.
#[derive(Debug, Error)]
pub enum Error {
    // Caller errors
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    #[error("task '{task_id}' not found")]
    TaskNotFound { task_id: String },

    #[error("agent '{agent_id}' not found")]
    AgentNotFound { agent_id: String },

    #[error("cannot {operation} task '{task_id}' while it is {status}")]
    InvalidState {
        task_id: String,
        status: TaskStatus,
        operation: &'static str,
    },

    #[error("task '{task_id}' is held by '{holder}', not '{agent_id}'")]
    AgentMismatch {
        task_id: String,
        holder: String,
        agent_id: String,
    },

    // Concurrency
    #[error("conflict on '{id}': {reason}")]
    Conflict { id: String, reason: String },

    // Collaborator failures
    #[error("storage operation '{operation}' failed: {reason}")]
    Storage { operation: String, reason: String },

    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error("failed to access '{path}': {reason}")]
    FileAccess { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable error category, for callers that dispatch on the kind of failure
/// rather than its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    InvalidState,
    AgentMismatch,
    Conflict,
    Internal,
}

impl Error {
    /// Create a validation error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Create a task not found error.
    pub fn task_not_found(task_id: impl Into<String>) -> Self {
        Self::TaskNotFound {
            task_id: task_id.into(),
        }
    }

    /// Create an agent not found error.
    pub fn agent_not_found(agent_id: impl Into<String>) -> Self {
        Self::AgentNotFound {
            agent_id: agent_id.into(),
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(
        task_id: impl Into<String>,
        status: TaskStatus,
        operation: &'static str,
    ) -> Self {
        Self::InvalidState {
            task_id: task_id.into(),
            status,
            operation,
        }
    }

    /// Create an agent mismatch error.
    pub fn agent_mismatch(
        task_id: impl Into<String>,
        holder: impl Into<String>,
        agent_id: impl Into<String>,
    ) -> Self {
        Self::AgentMismatch {
            task_id: task_id.into(),
            holder: holder.into(),
            agent_id: agent_id.into(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Conflict {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create a storage error.
    pub fn storage(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Storage {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create a file access error.
    pub fn file_access(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::FileAccess {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::TaskNotFound { .. } | Self::AgentNotFound { .. } => ErrorKind::NotFound,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::AgentMismatch { .. } => ErrorKind::AgentMismatch,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Storage { .. }
            | Self::Serialization { .. }
            | Self::Config { .. }
            | Self::FileAccess { .. }
            | Self::Io(_) => ErrorKind::Internal,
        }
    }

    /// Check if the caller may retry after re-reading the record.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
