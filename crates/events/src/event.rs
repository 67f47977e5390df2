//! Task lifecycle event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use guild_core::{Task, TaskId};

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Ulid);

impl EventId {
    /// Create a new random event ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Get the inner ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Notifications emitted by the assignment engine.
///
/// Every variant carries the task as it was right after the change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskEvent {
    /// A task was published and is open for claims.
    Published {
        event_id: EventId,
        task: Task,
        timestamp: DateTime<Utc>,
    },
    /// An agent won the claim on a task.
    Assigned {
        event_id: EventId,
        task: Task,
        agent_id: String,
        eta: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// The assigned agent started work.
    Started {
        event_id: EventId,
        task: Task,
        agent_id: String,
        timestamp: DateTime<Utc>,
    },
    /// The assigned agent finished the task.
    Completed {
        event_id: EventId,
        task: Task,
        agent_id: String,
        timestamp: DateTime<Utc>,
    },
    /// The assigned agent gave up on the task.
    Failed {
        event_id: EventId,
        task: Task,
        agent_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// A failed task was re-opened and is claimable again.
    Escalated {
        event_id: EventId,
        task: Task,
        timestamp: DateTime<Utc>,
    },
}

impl TaskEvent {
    /// Create a new Published event.
    #[must_use]
    pub fn published(task: Task) -> Self {
        Self::Published {
            event_id: EventId::new(),
            task,
            timestamp: Utc::now(),
        }
    }

    /// Create a new Assigned event.
    pub fn assigned(task: Task, agent_id: impl Into<String>, eta: Option<String>) -> Self {
        Self::Assigned {
            event_id: EventId::new(),
            task,
            agent_id: agent_id.into(),
            eta,
            timestamp: Utc::now(),
        }
    }

    /// Create a new Started event.
    pub fn started(task: Task, agent_id: impl Into<String>) -> Self {
        Self::Started {
            event_id: EventId::new(),
            task,
            agent_id: agent_id.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a new Completed event.
    pub fn completed(task: Task, agent_id: impl Into<String>) -> Self {
        Self::Completed {
            event_id: EventId::new(),
            task,
            agent_id: agent_id.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a new Failed event.
    pub fn failed(task: Task, agent_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            event_id: EventId::new(),
            task,
            agent_id: agent_id.into(),
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a new Escalated event.
    #[must_use]
    pub fn escalated(task: Task) -> Self {
        Self::Escalated {
            event_id: EventId::new(),
            task,
            timestamp: Utc::now(),
        }
    }

    /// Get the event ID.
    #[must_use]
    pub fn event_id(&self) -> EventId {
        match self {
            Self::Published { event_id, .. }
            | Self::Assigned { event_id, .. }
            | Self::Started { event_id, .. }
            | Self::Completed { event_id, .. }
            | Self::Failed { event_id, .. }
            | Self::Escalated { event_id, .. } => *event_id,
        }
    }

    /// Get the affected task.
    #[must_use]
    pub const fn task(&self) -> &Task {
        match self {
            Self::Published { task, .. }
            | Self::Assigned { task, .. }
            | Self::Started { task, .. }
            | Self::Completed { task, .. }
            | Self::Failed { task, .. }
            | Self::Escalated { task, .. } => task,
        }
    }

    /// Get the affected task's ID.
    #[must_use]
    pub const fn task_id(&self) -> &TaskId {
        &self.task().id
    }

    /// Get the timestamp.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Published { timestamp, .. }
            | Self::Assigned { timestamp, .. }
            | Self::Started { timestamp, .. }
            | Self::Completed { timestamp, .. }
            | Self::Failed { timestamp, .. }
            | Self::Escalated { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type name.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Published { .. } => "TASK_PUBLISHED",
            Self::Assigned { .. } => "TASK_ASSIGNED",
            Self::Started { .. } => "TASK_STARTED",
            Self::Completed { .. } => "TASK_COMPLETED",
            Self::Failed { .. } => "TASK_FAILED",
            Self::Escalated { .. } => "TASK_ESCALATED",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use guild_core::TaskSpec;

    fn open_task() -> Task {
        Task::open(
            TaskId::from("TASK-EVT"),
            &TaskSpec::new("Analyze", "Analyze market data"),
            Utc::now(),
        )
    }

    #[test]
    fn test_published_event() {
        let event = TaskEvent::published(open_task());
        assert_eq!(event.task_id().as_str(), "TASK-EVT");
        assert_eq!(event.event_type(), "TASK_PUBLISHED");
    }

    #[test]
    fn test_failure_events() {
        let failed = TaskEvent::failed(open_task(), "agent-y", "missing data");
        assert_eq!(failed.event_type(), "TASK_FAILED");
        assert!(matches!(&failed, TaskEvent::Failed { reason, .. } if reason == "missing data"));

        let escalated = TaskEvent::escalated(open_task());
        assert_eq!(escalated.event_type(), "TASK_ESCALATED");
        assert_ne!(failed.event_id(), escalated.event_id());
    }

    #[test]
    fn test_event_round_trips_through_json() {
        let event = TaskEvent::assigned(open_task(), "agent-x", Some("2 hours".to_string()));
        let json = serde_json::to_string(&event).unwrap();
        let back: TaskEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_id(), event.event_id());
        assert_eq!(back.task(), event.task());
        assert_eq!(back.event_type(), "TASK_ASSIGNED");
    }
}
