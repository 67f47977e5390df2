//! Assignment engine.
//!
//! Enforces the legal transition table on top of [`TaskStore::transition`],
//! records outcomes in the [`AgentRegistry`], and emits lifecycle events.
//!
//! # Example
//!
//! ```ignore
//! use guild_coordinator::{AssignmentEngine, GuildConfig};
//! use guild_core::TaskSpec;
//!
//! let engine = AssignmentEngine::in_memory(&GuildConfig::default());
//! let task = engine.publish(&TaskSpec::new("Research", "Research trends")).await?;
//! engine.accept(&task.id, "agent-x", Some("2 hours".into())).await?;
//! engine.start(&task.id, "agent-x").await?;
//! engine.complete(&task.id, "agent-x", serde_json::json!({"summary": "done"})).await?;
//! ```

use std::sync::Arc;

use itertools::Itertools;
use serde::Serialize;
use tracing::{error, info, warn};

use guild_core::{
    AgentRecord, Error, Outcome, Result, Task, TaskFilter, TaskId, TaskSpec, TaskStatus,
};
use guild_events::{EventSink, NoopSink, TaskEvent};

use crate::config::GuildConfig;
use crate::registry::AgentRegistry;
use crate::task_store::TaskStore;
use crate::transition::Change;

/// Aggregate counts over the task store and the agent ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub total_tasks: usize,
    pub open: usize,
    pub assigned: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub total_agents: usize,
    /// Mean reputation rounded to the nearest integer, 0 with no agents.
    pub average_reputation: u32,
}

/// Orchestrates publish, accept, start, complete and fail.
pub struct AssignmentEngine {
    tasks: Arc<TaskStore>,
    agents: Arc<AgentRegistry>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for AssignmentEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssignmentEngine")
            .field("tasks", &self.tasks)
            .field("agents", &self.agents)
            .finish_non_exhaustive()
    }
}

impl AssignmentEngine {
    /// Create an engine over existing stores. Events are dropped until a
    /// sink is attached with [`with_events`](Self::with_events).
    #[must_use]
    pub fn new(tasks: Arc<TaskStore>, agents: Arc<AgentRegistry>) -> Self {
        Self {
            tasks,
            agents,
            events: Arc::new(NoopSink),
        }
    }

    /// Create an engine over fresh in-memory stores.
    #[must_use]
    pub fn in_memory(config: &GuildConfig) -> Self {
        Self::new(
            Arc::new(TaskStore::in_memory()),
            Arc::new(AgentRegistry::in_memory(config)),
        )
    }

    /// Attach an event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// The task store.
    #[must_use]
    pub const fn tasks(&self) -> &Arc<TaskStore> {
        &self.tasks
    }

    /// The agent ledger.
    #[must_use]
    pub const fn agents(&self) -> &Arc<AgentRegistry> {
        &self.agents
    }

    /// Publish a new OPEN task.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the title or description is blank.
    pub async fn publish(&self, spec: &TaskSpec) -> Result<Task> {
        let task = self.tasks.create(spec).await?;
        info!(
            task_id = %task.id,
            created_by = %task.created_by,
            priority = %task.priority,
            "Task published"
        );
        self.events.emit(TaskEvent::published(task.clone())).await;
        Ok(task)
    }

    /// Claim an OPEN task for `agent_id`.
    ///
    /// # Errors
    ///
    /// - `Error::Validation` if `agent_id` is blank.
    /// - `Error::TaskNotFound` if the task does not exist.
    /// - `Error::Conflict` if the task is already claimed, or another agent
    ///   won a concurrent race.
    /// - `Error::InvalidState` if the task is completed.
    pub async fn accept(
        &self,
        task_id: &TaskId,
        agent_id: &str,
        eta: Option<String>,
    ) -> Result<Task> {
        require_agent(agent_id)?;
        let current = self.tasks.get(task_id).await?;

        match current.status {
            TaskStatus::Open => {}
            TaskStatus::Assigned | TaskStatus::InProgress => {
                warn!(task_id = %task_id, agent_id, holder = ?current.holder(), "Task already claimed");
                return Err(Error::conflict(
                    task_id.as_str(),
                    format!(
                        "already claimed by {}",
                        current.holder().unwrap_or("another agent")
                    ),
                ));
            }
            TaskStatus::Completed => {
                return Err(Error::invalid_state(task_id.as_str(), current.status, "accept"));
            }
        }

        let eta = eta.filter(|e| !e.trim().is_empty());
        let change = Change::Assign {
            agent_id: agent_id.to_string(),
            eta: eta.clone(),
        };
        let task = self
            .tasks
            .transition(task_id, TaskStatus::Open, change)
            .await?;

        info!(task_id = %task_id, agent_id, eta = ?eta, "Task assigned");
        self.events
            .emit(TaskEvent::assigned(task.clone(), agent_id, eta))
            .await;
        Ok(task)
    }

    /// Move an ASSIGNED task held by `agent_id` to IN_PROGRESS.
    ///
    /// # Errors
    ///
    /// - `Error::TaskNotFound` if the task does not exist.
    /// - `Error::AgentMismatch` if another agent holds it.
    /// - `Error::InvalidState` if it is not ASSIGNED to `agent_id`.
    /// - `Error::Conflict` if a concurrent transition got there first.
    pub async fn start(&self, task_id: &TaskId, agent_id: &str) -> Result<Task> {
        let change = Change::Start {
            agent_id: agent_id.to_string(),
        };
        let task = self.held_transition(task_id, change).await?;

        info!(task_id = %task_id, agent_id, "Task started");
        self.events
            .emit(TaskEvent::started(task.clone(), agent_id))
            .await;
        Ok(task)
    }

    /// Complete an IN_PROGRESS task held by `agent_id` and credit the agent.
    ///
    /// # Errors
    ///
    /// As [`start`](Self::start), with IN_PROGRESS as the required status,
    /// plus `Error::Validation` for a null result. A ledger failure is
    /// reported as `Error::Storage` after the task is already COMPLETED;
    /// it is never retryable.
    pub async fn complete(
        &self,
        task_id: &TaskId,
        agent_id: &str,
        result: serde_json::Value,
    ) -> Result<Task> {
        // A null result would read back as an absent one.
        if result.is_null() {
            return Err(Error::validation("result must not be null"));
        }
        let change = Change::Complete {
            agent_id: agent_id.to_string(),
            result,
        };
        let task = self.held_transition(task_id, change).await?;

        info!(task_id = %task_id, agent_id, "Task completed");
        self.events
            .emit(TaskEvent::completed(task.clone(), agent_id))
            .await;
        self.record_committed_outcome(&task, agent_id, Outcome::Success)
            .await?;
        Ok(task)
    }

    /// Report failure on a task held by `agent_id`, re-opening it for every
    /// agent and penalising the reporter.
    ///
    /// # Errors
    ///
    /// As [`start`](Self::start), with ASSIGNED or IN_PROGRESS as the
    /// required status. A ledger failure is reported as `Error::Storage`
    /// after the task is already re-opened.
    pub async fn fail(
        &self,
        task_id: &TaskId,
        agent_id: &str,
        reason: Option<String>,
    ) -> Result<Task> {
        let change = Change::Reopen {
            agent_id: agent_id.to_string(),
            reason,
        };
        let task = self.held_transition(task_id, change).await?;
        let reason = task.failure_reason.clone().unwrap_or_default();

        warn!(task_id = %task_id, agent_id, reason = %reason, "Task failed, re-opened for reassignment");
        self.events
            .emit(TaskEvent::failed(task.clone(), agent_id, reason))
            .await;
        self.events.emit(TaskEvent::escalated(task.clone())).await;
        self.record_committed_outcome(&task, agent_id, Outcome::Failure)
            .await?;
        Ok(task)
    }

    /// Fetch a task.
    ///
    /// # Errors
    ///
    /// Returns `Error::TaskNotFound` if it does not exist.
    pub async fn get_task(&self, task_id: &TaskId) -> Result<Task> {
        self.tasks.get(task_id).await
    }

    /// Tasks matching `filter`, most recent first.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        self.tasks.list(filter).await
    }

    /// OPEN tasks an agent with `capabilities` can handle, most recent first.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn browse(&self, capabilities: &[String]) -> Result<Vec<Task>> {
        let open = self
            .tasks
            .list(&TaskFilter::all().with_status(TaskStatus::Open))
            .await?;
        Ok(open
            .into_iter()
            .filter(|task| can_handle(capabilities, task))
            .collect())
    }

    /// Fetch an agent's ledger.
    ///
    /// # Errors
    ///
    /// Returns `Error::AgentNotFound` if the agent has no recorded outcome.
    pub async fn get_agent(&self, agent_id: &str) -> Result<AgentRecord> {
        self.agents.get(agent_id).await
    }

    /// Every agent ledger, highest reputation first.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn list_agents(&self) -> Result<Vec<AgentRecord>> {
        self.agents.list().await
    }

    /// Aggregate statistics.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn stats(&self) -> Result<EngineStats> {
        let tasks = self.tasks.list(&TaskFilter::all()).await?;
        let agents = self.agents.list().await?;

        let by_status = tasks.iter().map(|t| t.status).counts();
        let count = |status: TaskStatus| by_status.get(&status).copied().unwrap_or(0);

        Ok(EngineStats {
            total_tasks: tasks.len(),
            open: count(TaskStatus::Open),
            assigned: count(TaskStatus::Assigned),
            in_progress: count(TaskStatus::InProgress),
            completed: count(TaskStatus::Completed),
            total_agents: agents.len(),
            average_reputation: rounded_mean(agents.iter().map(|a| a.reputation)),
        })
    }

    /// Credit an outcome once its transition is stored. The task cannot be
    /// rolled back at this point, so a ledger error is turned into a
    /// non-retryable storage error naming the committed status.
    async fn record_committed_outcome(
        &self,
        task: &Task,
        agent_id: &str,
        outcome: Outcome,
    ) -> Result<()> {
        match self.agents.record_outcome(agent_id, outcome).await {
            Ok(_) => Ok(()),
            Err(e) => {
                error!(task_id = %task.id, agent_id, %outcome, error = %e, "Ledger update failed after transition");
                Err(Error::storage(
                    "record outcome",
                    format!(
                        "task {} is already {} but the {outcome} outcome for {agent_id} was not recorded: {e}",
                        task.id, task.status
                    ),
                ))
            }
        }
    }

    /// Holder checks shared by start, complete and fail, then the transition.
    async fn held_transition(&self, task_id: &TaskId, change: Change) -> Result<Task> {
        let current = self.tasks.get(task_id).await?;
        let agent_id = change.agent_id();

        if let Some(holder) = current.holder() {
            if holder != agent_id {
                warn!(task_id = %task_id, agent_id, holder, operation = change.operation(), "Agent does not hold task");
                return Err(Error::agent_mismatch(task_id.as_str(), holder, agent_id));
            }
        }

        if !current.is_held_by(agent_id) || !change.permits(current.status) {
            return Err(Error::invalid_state(
                task_id.as_str(),
                current.status,
                change.operation(),
            ));
        }

        self.tasks.transition(task_id, current.status, change).await
    }
}

fn require_agent(agent_id: &str) -> Result<()> {
    if agent_id.trim().is_empty() {
        return Err(Error::validation("agent id must not be empty"));
    }
    Ok(())
}

/// Generalist agents handle anything; tasks without requirements suit anyone.
fn can_handle(capabilities: &[String], task: &Task) -> bool {
    capabilities.is_empty()
        || task.requirements.is_empty()
        || task.requirements.iter().any(|req| capabilities.contains(req))
}

fn rounded_mean(values: impl Iterator<Item = u32>) -> u32 {
    let (sum, n) = values.fold((0u64, 0u64), |(sum, n), v| {
        (sum.saturating_add(u64::from(v)), n.saturating_add(1))
    });
    sum.saturating_mul(2)
        .saturating_add(n)
        .checked_div(n.saturating_mul(2))
        .and_then(|mean| u32::try_from(mean).ok())
        .unwrap_or(0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use guild_events::RecordingSink;

    fn engine() -> AssignmentEngine {
        AssignmentEngine::in_memory(&GuildConfig::default())
    }

    fn spec(requirements: &[&str]) -> TaskSpec {
        TaskSpec::new("Research", "Research trends")
            .with_requirements(requirements.iter().copied())
            .created_by("publisher")
    }

    #[tokio::test]
    async fn test_accept_twice_conflicts() {
        let engine = engine();
        let task = engine.publish(&spec(&[])).await.unwrap();
        engine.accept(&task.id, "a", None).await.unwrap();

        let err = engine.accept(&task.id, "b", None).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_accept_completed_is_invalid_state() {
        let engine = engine();
        let task = engine.publish(&spec(&[])).await.unwrap();
        engine.accept(&task.id, "a", None).await.unwrap();
        engine.start(&task.id, "a").await.unwrap();
        engine
            .complete(&task.id, "a", serde_json::json!("ok"))
            .await
            .unwrap();

        let err = engine.accept(&task.id, "b", None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_accept_blank_agent_rejected() {
        let engine = engine();
        let task = engine.publish(&spec(&[])).await.unwrap();
        let err = engine.accept(&task.id, " ", None).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn test_start_by_other_agent_is_mismatch() {
        let engine = engine();
        let task = engine.publish(&spec(&[])).await.unwrap();
        engine.accept(&task.id, "a", None).await.unwrap();

        let err = engine.start(&task.id, "b").await.unwrap_err();
        assert!(matches!(err, Error::AgentMismatch { .. }));
    }

    #[tokio::test]
    async fn test_start_open_task_is_invalid_state() {
        let engine = engine();
        let task = engine.publish(&spec(&[])).await.unwrap();
        let err = engine.start(&task.id, "a").await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_complete_assigned_task_is_invalid_state() {
        let engine = engine();
        let task = engine.publish(&spec(&[])).await.unwrap();
        engine.accept(&task.id, "a", None).await.unwrap();

        let err = engine
            .complete(&task.id, "a", serde_json::json!("early"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
        assert!(matches!(
            engine.get_agent("a").await,
            Err(Error::AgentNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_fail_from_assigned_reopens() {
        let engine = engine();
        let task = engine.publish(&spec(&[])).await.unwrap();
        engine.accept(&task.id, "a", Some("1 hour".into())).await.unwrap();

        let task = engine.fail(&task.id, "a", None).await.unwrap();
        assert_eq!(task.status, TaskStatus::Open);
        assert_eq!(task.failure_reason.as_deref(), Some("Task failed"));
        assert_eq!(engine.get_agent("a").await.unwrap().reputation, 90);
    }

    #[tokio::test]
    async fn test_null_result_rejected() {
        let engine = engine();
        let task = engine.publish(&spec(&[])).await.unwrap();
        engine.accept(&task.id, "a", None).await.unwrap();
        engine.start(&task.id, "a").await.unwrap();

        let err = engine
            .complete(&task.id, "a", serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert_eq!(
            engine.get_task(&task.id).await.unwrap().status,
            TaskStatus::InProgress
        );
    }

    #[tokio::test]
    async fn test_missing_task() {
        let engine = engine();
        let err = engine
            .accept(&TaskId::from("TASK-NOPE"), "a", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TaskNotFound { .. }));
    }

    #[tokio::test]
    async fn test_events_emitted_in_order() {
        let sink = Arc::new(RecordingSink::new());
        let engine = engine().with_events(sink.clone());

        let task = engine.publish(&spec(&[])).await.unwrap();
        engine.accept(&task.id, "a", None).await.unwrap();
        engine.start(&task.id, "a").await.unwrap();
        engine.fail(&task.id, "a", Some("broken".into())).await.unwrap();
        engine.accept(&task.id, "b", None).await.unwrap();
        engine.start(&task.id, "b").await.unwrap();
        engine
            .complete(&task.id, "b", serde_json::json!({"ok": true}))
            .await
            .unwrap();

        assert_eq!(
            sink.event_types().await,
            vec![
                "TASK_PUBLISHED",
                "TASK_ASSIGNED",
                "TASK_STARTED",
                "TASK_FAILED",
                "TASK_ESCALATED",
                "TASK_ASSIGNED",
                "TASK_STARTED",
                "TASK_COMPLETED",
            ]
        );
    }

    #[tokio::test]
    async fn test_rejected_operation_emits_nothing() {
        let sink = Arc::new(RecordingSink::new());
        let engine = engine().with_events(sink.clone());
        let task = engine.publish(&spec(&[])).await.unwrap();

        assert!(engine.start(&task.id, "a").await.is_err());
        assert_eq!(sink.event_types().await, vec!["TASK_PUBLISHED"]);
    }

    #[tokio::test]
    async fn test_browse_matches_capabilities() {
        let engine = engine();
        let research = engine.publish(&spec(&["research"])).await.unwrap();
        let code = engine.publish(&spec(&["code"])).await.unwrap();
        let any = engine.publish(&spec(&[])).await.unwrap();
        let taken = engine.publish(&spec(&["research"])).await.unwrap();
        engine.accept(&taken.id, "a", None).await.unwrap();

        let ids = |tasks: Vec<Task>| tasks.into_iter().map(|t| t.id).collect::<Vec<_>>();

        let for_researcher = engine.browse(&["research".to_string()]).await.unwrap();
        assert_eq!(ids(for_researcher), vec![any.id.clone(), research.id.clone()]);

        let for_generalist = engine.browse(&[]).await.unwrap();
        assert_eq!(ids(for_generalist), vec![any.id, code.id, research.id]);
    }

    #[tokio::test]
    async fn test_stats() {
        let engine = engine();
        assert_eq!(engine.stats().await.unwrap(), EngineStats::default());

        let a = engine.publish(&spec(&[])).await.unwrap();
        let b = engine.publish(&spec(&[])).await.unwrap();
        engine.publish(&spec(&[])).await.unwrap();

        engine.accept(&a.id, "x", None).await.unwrap();
        engine.start(&a.id, "x").await.unwrap();
        engine.complete(&a.id, "x", serde_json::json!(1)).await.unwrap();
        engine.accept(&b.id, "y", None).await.unwrap();
        engine.fail(&b.id, "y", None).await.unwrap();
        engine.accept(&b.id, "z", None).await.unwrap();

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.total_tasks, 3);
        assert_eq!(stats.open, 1);
        assert_eq!(stats.assigned, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.total_agents, 2);
        assert_eq!(stats.average_reputation, 95);
    }

    #[test]
    fn test_rounded_mean() {
        assert_eq!(rounded_mean(std::iter::empty()), 0);
        assert_eq!(rounded_mean([100, 90].into_iter()), 95);
        assert_eq!(rounded_mean([100, 91].into_iter()), 96);
        assert_eq!(rounded_mean([1, 2].into_iter()), 2);
        assert_eq!(rounded_mean([1, 1, 2].into_iter()), 1);
    }
}
