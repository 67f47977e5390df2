//! Pure task mutations.
//!
//! A [`Change`] knows which statuses it may be applied from, which agent must
//! (or must not) hold the task, and how to produce the next record with its
//! single history entry. It never touches storage.

use chrono::{DateTime, Utc};

use guild_core::{HistoryAction, HistoryEntry, Task, TaskStatus};

/// Reason recorded when a failing agent gives none.
pub const DEFAULT_FAILURE_REASON: &str = "Task failed";

/// One state-machine step requested by an agent.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// OPEN -> ASSIGNED.
    Assign {
        agent_id: String,
        eta: Option<String>,
    },
    /// ASSIGNED -> IN_PROGRESS.
    Start { agent_id: String },
    /// IN_PROGRESS -> COMPLETED.
    Complete {
        agent_id: String,
        result: serde_json::Value,
    },
    /// ASSIGNED | IN_PROGRESS -> OPEN.
    Reopen {
        agent_id: String,
        reason: Option<String>,
    },
}

impl Change {
    /// Engine operation name, used in error messages and logs.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::Assign { .. } => "accept",
            Self::Start { .. } => "start",
            Self::Complete { .. } => "complete",
            Self::Reopen { .. } => "fail",
        }
    }

    /// The agent requesting the change.
    #[must_use]
    pub fn agent_id(&self) -> &str {
        match self {
            Self::Assign { agent_id, .. }
            | Self::Start { agent_id }
            | Self::Complete { agent_id, .. }
            | Self::Reopen { agent_id, .. } => agent_id,
        }
    }

    /// Status the task lands in.
    #[must_use]
    pub const fn target(&self) -> TaskStatus {
        match self {
            Self::Assign { .. } => TaskStatus::Assigned,
            Self::Start { .. } => TaskStatus::InProgress,
            Self::Complete { .. } => TaskStatus::Completed,
            Self::Reopen { .. } => TaskStatus::Open,
        }
    }

    /// Check if the change may be applied from `status`.
    #[must_use]
    pub fn permits(&self, status: TaskStatus) -> bool {
        let from_ok = match self {
            Self::Assign { .. } => status == TaskStatus::Open,
            Self::Start { .. } => status == TaskStatus::Assigned,
            Self::Complete { .. } => status == TaskStatus::InProgress,
            Self::Reopen { .. } => status.is_held(),
        };
        from_ok && status.can_transition_to(self.target())
    }

    /// Check the ownership predicate against the task's current holder.
    ///
    /// Assignment requires an unheld task; every other change requires the
    /// requesting agent to be the holder.
    #[must_use]
    pub fn owner_matches(&self, task: &Task) -> bool {
        match self {
            Self::Assign { .. } => task.holder().is_none(),
            Self::Start { agent_id }
            | Self::Complete { agent_id, .. }
            | Self::Reopen { agent_id, .. } => task.is_held_by(agent_id),
        }
    }

    /// Produce the next record, appending exactly one history entry.
    #[must_use]
    pub fn apply(self, mut task: Task, now: DateTime<Utc>) -> Task {
        let entry = match self {
            Self::Assign { agent_id, eta } => {
                let message = match &eta {
                    Some(eta) => format!("Task assigned to {agent_id} (ETA: {eta})"),
                    None => format!("Task assigned to {agent_id}"),
                };
                task.status = TaskStatus::Assigned;
                task.assigned_to = Some(agent_id.clone());
                task.accepted_at = Some(now);
                task.eta = eta;
                HistoryEntry::new(HistoryAction::Assigned, message, agent_id, now)
            }
            Self::Start { agent_id } => {
                task.status = TaskStatus::InProgress;
                task.started_at = Some(now);
                HistoryEntry::new(HistoryAction::Started, "Task started", agent_id, now)
            }
            Self::Complete { agent_id, result } => {
                task.status = TaskStatus::Completed;
                task.assigned_to = None;
                task.completed_at = Some(now);
                task.completed_by = Some(agent_id.clone());
                task.result = Some(result);
                HistoryEntry::new(
                    HistoryAction::Completed,
                    "Task completed successfully",
                    agent_id,
                    now,
                )
            }
            Self::Reopen { agent_id, reason } => {
                let reason = reason
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_FAILURE_REASON.to_string());
                task.status = TaskStatus::Open;
                task.assigned_to = None;
                task.accepted_at = None;
                task.started_at = None;
                task.eta = None;
                task.failure_reason = Some(reason.clone());
                HistoryEntry::new(
                    HistoryAction::Failed,
                    format!("Task failed: {reason}; reopened for reassignment"),
                    agent_id,
                    now,
                )
            }
        };
        task.history.push(entry);
        task
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use guild_core::{TaskId, TaskSpec};

    fn open_task() -> Task {
        Task::open(
            TaskId::from("TASK-1"),
            &TaskSpec::new("Research", "Research trends").with_requirement("research"),
            Utc::now(),
        )
    }

    fn assign(agent: &str) -> Change {
        Change::Assign {
            agent_id: agent.to_string(),
            eta: Some("2 hours".to_string()),
        }
    }

    #[test]
    fn test_assign_sets_holder_and_history() {
        let task = assign("agent-x").apply(open_task(), Utc::now());

        assert_eq!(task.status, TaskStatus::Assigned);
        assert_eq!(task.holder(), Some("agent-x"));
        assert!(task.accepted_at.is_some());
        assert_eq!(task.eta.as_deref(), Some("2 hours"));
        assert_eq!(task.history.len(), 2);
        assert_eq!(
            task.last_event().map(|e| e.message.as_str()),
            Some("Task assigned to agent-x (ETA: 2 hours)")
        );
        assert!(task.check_invariants().is_ok());
    }

    #[test]
    fn test_assign_without_eta_message() {
        let change = Change::Assign {
            agent_id: "agent-x".to_string(),
            eta: None,
        };
        let task = change.apply(open_task(), Utc::now());
        assert_eq!(
            task.last_event().map(|e| e.message.as_str()),
            Some("Task assigned to agent-x")
        );
    }

    #[test]
    fn test_complete_moves_holder_to_completed_by() {
        let now = Utc::now();
        let task = assign("agent-x").apply(open_task(), now);
        let task = Change::Start {
            agent_id: "agent-x".to_string(),
        }
        .apply(task, now);
        let task = Change::Complete {
            agent_id: "agent-x".to_string(),
            result: serde_json::json!({"summary": "done"}),
        }
        .apply(task, now);

        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.assigned_to.is_none());
        assert_eq!(task.completed_by.as_deref(), Some("agent-x"));
        assert_eq!(task.history.len(), 4);
        assert!(task.check_invariants().is_ok());
    }

    #[test]
    fn test_reopen_clears_assignment_and_keeps_reason() {
        let now = Utc::now();
        let task = assign("agent-y").apply(open_task(), now);
        let task = Change::Reopen {
            agent_id: "agent-y".to_string(),
            reason: Some("missing data".to_string()),
        }
        .apply(task, now);

        assert_eq!(task.status, TaskStatus::Open);
        assert!(task.assigned_to.is_none());
        assert!(task.accepted_at.is_none());
        assert!(task.started_at.is_none());
        assert_eq!(task.failure_reason.as_deref(), Some("missing data"));
        assert_eq!(task.history.len(), 3);
        let last = task.last_event().unwrap();
        assert_eq!(last.action, HistoryAction::Failed);
        assert_eq!(
            last.message,
            "Task failed: missing data; reopened for reassignment"
        );
        assert!(task.check_invariants().is_ok());
    }

    #[test]
    fn test_reopen_without_reason_uses_default() {
        let task = assign("agent-y").apply(open_task(), Utc::now());
        let task = Change::Reopen {
            agent_id: "agent-y".to_string(),
            reason: None,
        }
        .apply(task, Utc::now());
        assert_eq!(task.failure_reason.as_deref(), Some(DEFAULT_FAILURE_REASON));
    }

    #[test]
    fn test_permits_follows_status_table() {
        let start = Change::Start {
            agent_id: "a".to_string(),
        };
        let reopen = Change::Reopen {
            agent_id: "a".to_string(),
            reason: None,
        };
        assert!(assign("a").permits(TaskStatus::Open));
        assert!(!assign("a").permits(TaskStatus::Assigned));
        assert!(start.permits(TaskStatus::Assigned));
        assert!(!start.permits(TaskStatus::Open));
        assert!(reopen.permits(TaskStatus::Assigned));
        assert!(reopen.permits(TaskStatus::InProgress));
        assert!(!reopen.permits(TaskStatus::Open));
        assert!(!reopen.permits(TaskStatus::Completed));
    }

    #[test]
    fn test_owner_predicate() {
        let open = open_task();
        assert!(assign("a").owner_matches(&open));

        let held = assign("a").apply(open, Utc::now());
        assert!(!assign("b").owner_matches(&held));
        assert!(
            Change::Start {
                agent_id: "a".to_string()
            }
            .owner_matches(&held)
        );
        assert!(
            !Change::Start {
                agent_id: "b".to_string()
            }
            .owner_matches(&held)
        );
    }
}
