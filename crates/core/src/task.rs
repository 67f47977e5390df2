//! Task records and the task state machine.
//!
//! ```text
//! OPEN --accept--> ASSIGNED --start--> IN_PROGRESS --complete--> COMPLETED
//!   ^                 |                     |
//!   +------fail-------+---------fail--------+
//! ```
//!
//! FAILED is never a resting status: a failure is recorded in history and the
//! task is re-opened in the same step.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::TaskId;

/// Creator recorded when a publisher does not identify itself.
const UNKNOWN_CREATOR: &str = "unknown";

/// Task priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            other => Err(Error::validation(format!("unknown priority '{other}'"))),
        }
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Published and claimable by any agent.
    Open,
    /// Claimed by exactly one agent, not yet started.
    Assigned,
    /// Being worked on by the assigned agent.
    InProgress,
    /// Terminal: finished successfully.
    Completed,
}

impl TaskStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 4] = [Self::Open, Self::Assigned, Self::InProgress, Self::Completed];

    /// Get all valid transitions from the current status.
    #[must_use]
    pub const fn valid_transitions(&self) -> &'static [Self] {
        match self {
            Self::Open => &[Self::Assigned],
            Self::Assigned => &[Self::InProgress, Self::Open],
            Self::InProgress => &[Self::Completed, Self::Open],
            Self::Completed => &[],
        }
    }

    /// Check if transition to target status is valid.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        self.valid_transitions().contains(&target)
    }

    /// Check if this is the terminal status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Check if a task in this status is held by an agent.
    #[must_use]
    pub const fn is_held(&self) -> bool {
        matches!(self, Self::Assigned | Self::InProgress)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Open => "OPEN",
            Self::Assigned => "ASSIGNED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
        };
        write!(f, "{s}")
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "OPEN" => Ok(Self::Open),
            "ASSIGNED" => Ok(Self::Assigned),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            other => Err(Error::validation(format!("unknown task status '{other}'"))),
        }
    }
}

/// Kind of change recorded in a task's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryAction {
    Created,
    Assigned,
    Started,
    Completed,
    Failed,
}

impl std::fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "CREATED",
            Self::Assigned => "ASSIGNED",
            Self::Started => "STARTED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

/// Immutable audit record of one state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub action: HistoryAction,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
}

impl HistoryEntry {
    /// Create a history entry.
    pub fn new(
        action: HistoryAction,
        message: impl Into<String>,
        actor: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            action,
            message: message.into(),
            timestamp,
            actor: actor.into(),
        }
    }
}

/// Publisher-supplied description of a new task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl TaskSpec {
    /// Create a new task spec.
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    /// Add a requirement tag.
    #[must_use]
    pub fn with_requirement(mut self, tag: impl Into<String>) -> Self {
        self.requirements.push(tag.into());
        self
    }

    /// Replace the requirement tags.
    #[must_use]
    pub fn with_requirements<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requirements = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the creator.
    #[must_use]
    pub fn created_by(mut self, creator: impl Into<String>) -> Self {
        self.created_by = Some(creator.into());
        self
    }

    /// Validate required fields.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the title or description is blank or a
    /// requirement tag is blank.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::validation("title must not be empty"));
        }
        if self.description.trim().is_empty() {
            return Err(Error::validation("description must not be empty"));
        }
        if self.requirements.iter().any(|tag| tag.trim().is_empty()) {
            return Err(Error::validation("requirement tags must not be empty"));
        }
        Ok(())
    }

    /// Requirement tags with duplicates removed, first occurrence kept.
    fn ordered_requirements(&self) -> Vec<String> {
        self.requirements.iter().fold(Vec::new(), |mut acc, tag| {
            if !acc.contains(tag) {
                acc.push(tag.clone());
            }
            acc
        })
    }
}

/// A unit of work and its full audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub requirements: Vec<String>,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub status: TaskStatus,
    pub assigned_to: Option<String>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Agent that completed the task; `assigned_to` is cleared on completion.
    #[serde(default)]
    pub completed_by: Option<String>,
    pub eta: Option<String>,
    pub result: Option<serde_json::Value>,
    /// Reason for the most recent failure, kept after the task re-opens.
    pub failure_reason: Option<String>,
    pub history: Vec<HistoryEntry>,
}

impl Task {
    /// Build a freshly published OPEN task with its `CREATED` history entry.
    ///
    /// `spec` must already have passed [`TaskSpec::validate`].
    #[must_use]
    pub fn open(id: TaskId, spec: &TaskSpec, now: DateTime<Utc>) -> Self {
        let created_by = spec
            .created_by
            .clone()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_CREATOR.to_string());

        Self {
            id,
            title: spec.title.clone(),
            description: spec.description.clone(),
            requirements: spec.ordered_requirements(),
            priority: spec.priority,
            created_at: now,
            created_by: created_by.clone(),
            status: TaskStatus::Open,
            assigned_to: None,
            accepted_at: None,
            started_at: None,
            completed_at: None,
            completed_by: None,
            eta: None,
            result: None,
            failure_reason: None,
            history: vec![HistoryEntry::new(
                HistoryAction::Created,
                "Task created",
                created_by,
                now,
            )],
        }
    }

    /// Agent currently holding the assignment, if any.
    #[must_use]
    pub fn holder(&self) -> Option<&str> {
        self.assigned_to.as_deref()
    }

    /// Check if the given agent currently holds this task.
    #[must_use]
    pub fn is_held_by(&self, agent_id: &str) -> bool {
        self.holder() == Some(agent_id)
    }

    /// The most recent history entry.
    #[must_use]
    pub fn last_event(&self) -> Option<&HistoryEntry> {
        self.history.last()
    }

    /// Check the record-level invariants.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` describing the first violated invariant.
    pub fn check_invariants(&self) -> Result<()> {
        if self.status.is_held() != self.assigned_to.is_some() {
            return Err(Error::validation(format!(
                "task '{}' is {} but assignedTo is {:?}",
                self.id, self.status, self.assigned_to
            )));
        }
        if (self.status == TaskStatus::Completed) != self.result.is_some() {
            return Err(Error::validation(format!(
                "task '{}' is {} but result presence is {}",
                self.id,
                self.status,
                self.result.is_some()
            )));
        }
        if self.history.is_empty() {
            return Err(Error::validation(format!(
                "task '{}' has no history",
                self.id
            )));
        }
        Ok(())
    }
}

/// Conjunctive filter for task listings. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub assigned_to: Option<String>,
    pub created_by: Option<String>,
}

impl TaskFilter {
    /// Filter matching every task.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to a status.
    #[must_use]
    pub const fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Restrict to tasks held by an agent.
    #[must_use]
    pub fn with_assigned_to(mut self, agent_id: impl Into<String>) -> Self {
        self.assigned_to = Some(agent_id.into());
        self
    }

    /// Restrict to tasks published by a creator.
    #[must_use]
    pub fn with_created_by(mut self, creator: impl Into<String>) -> Self {
        self.created_by = Some(creator.into());
        self
    }

    /// Check if a task matches every set criterion.
    #[must_use]
    pub fn matches(&self, task: &Task) -> bool {
        self.status.is_none_or(|s| task.status == s)
            && self
                .assigned_to
                .as_deref()
                .is_none_or(|a| task.assigned_to.as_deref() == Some(a))
            && self
                .created_by
                .as_deref()
                .is_none_or(|c| task.created_by == c)
    }
}
