//! Task identifiers.

use std::borrow::Borrow;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

const TASK_PREFIX: &str = "TASK-";

/// Opaque, unique task identifier.
///
/// Fresh ids are rendered as `TASK-<ULID>`, so ids minted by a monotonic
/// generator sort in creation order. Ids read back from storage are accepted
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Create a task id from a ULID.
    #[must_use]
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(format!("{TASK_PREFIX}{ulid}"))
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for TaskId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
