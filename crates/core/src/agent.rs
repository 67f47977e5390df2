//! Agent reputation ledger records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Highest reputation any agent can hold.
pub const MAX_REPUTATION: u32 = 100;

/// Result of a task attributed to the agent holding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Success,
    Failure,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::Failure => write!(f, "FAILURE"),
        }
    }
}

/// Reputation and task-count ledger for one agent id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub id: String,
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub reputation: u32,
    pub created_at: DateTime<Utc>,
}

impl AgentRecord {
    /// Create an empty ledger for an agent.
    pub fn new(id: impl Into<String>, reputation: u32, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            total_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            reputation: reputation.min(MAX_REPUTATION),
            created_at,
        }
    }

    /// Check the ledger invariants.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the counters disagree or the reputation
    /// is out of bounds.
    pub fn check_invariants(&self) -> Result<()> {
        if self.completed_tasks.checked_add(self.failed_tasks) != Some(self.total_tasks) {
            return Err(Error::validation(format!(
                "agent '{}' has totalTasks {} but {} completed and {} failed",
                self.id, self.total_tasks, self.completed_tasks, self.failed_tasks
            )));
        }
        if self.reputation > MAX_REPUTATION {
            return Err(Error::validation(format!(
                "agent '{}' reputation {} exceeds {MAX_REPUTATION}",
                self.id, self.reputation
            )));
        }
        Ok(())
    }
}
