//! Authoritative task storage.
//!
//! Every mutation after `create` goes through [`TaskStore::transition`],
//! which checks the expected status and holder against a versioned read and
//! writes back with compare-and-swap. A writer that interleaves between the
//! read and the write makes the swap fail with `Error::Conflict`, so the
//! record is never partially mutated.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use ulid::{Generator, Ulid};

use guild_core::{Error, Result, Task, TaskFilter, TaskId, TaskSpec, TaskStatus};

use crate::record_store::{InMemoryRecordStore, RecordStore};
use crate::transition::Change;

/// Task records over a pluggable [`RecordStore`].
pub struct TaskStore {
    records: Arc<dyn RecordStore<Task>>,
    ids: Mutex<Generator>,
}

impl std::fmt::Debug for TaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskStore").finish_non_exhaustive()
    }
}

impl TaskStore {
    /// Create a task store over the given records backend.
    #[must_use]
    pub fn new(records: Arc<dyn RecordStore<Task>>) -> Self {
        Self {
            records,
            ids: Mutex::new(Generator::new()),
        }
    }

    /// Create a task store backed by memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(InMemoryRecordStore::<Task>::new_arc())
    }

    /// Publish a new OPEN task.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the title or description is blank.
    pub async fn create(&self, spec: &TaskSpec) -> Result<Task> {
        spec.validate()?;

        // Id and timestamp are taken under one lock so that creation order,
        // id order and timestamp order agree.
        let task = {
            let mut ids = self.ids.lock().await;
            let ulid = ids.generate().unwrap_or_else(|e| {
                warn!(error = %e, "Monotonic id space exhausted, using a fresh ULID");
                Ulid::new()
            });
            Task::open(TaskId::from_ulid(ulid), spec, Utc::now())
        };

        let key = task.id.to_string();
        let stored = self.records.insert(&key, task).await?;
        debug!(task_id = %stored.record.id, "Task record created");
        Ok(stored.record)
    }

    /// Fetch a task by id.
    ///
    /// # Errors
    ///
    /// Returns `Error::TaskNotFound` if no task has this id.
    pub async fn get(&self, id: &TaskId) -> Result<Task> {
        self.records
            .get(id.as_str())
            .await?
            .map(|versioned| versioned.record)
            .ok_or_else(|| Error::task_not_found(id.as_str()))
    }

    /// Snapshot of the tasks matching `filter`, most recently created first.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .records
            .values()
            .await?
            .into_iter()
            .filter(|task| filter.matches(task))
            .collect();
        tasks.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(tasks)
    }

    /// Apply `change` if the task is still in `expected` status and the
    /// ownership predicate holds.
    ///
    /// # Errors
    ///
    /// - `Error::TaskNotFound` if the task does not exist.
    /// - `Error::InvalidState` if `change` can never apply from `expected`.
    /// - `Error::Conflict` if the current status differs from `expected`,
    ///   the holder does not match, or a concurrent writer got there first.
    pub async fn transition(
        &self,
        id: &TaskId,
        expected: TaskStatus,
        change: Change,
    ) -> Result<Task> {
        if !change.permits(expected) {
            return Err(Error::invalid_state(id.as_str(), expected, change.operation()));
        }

        let current = self
            .records
            .get(id.as_str())
            .await?
            .ok_or_else(|| Error::task_not_found(id.as_str()))?;

        if current.record.status != expected {
            return Err(Error::conflict(
                id.as_str(),
                format!(
                    "expected status {expected}, found {}",
                    current.record.status
                ),
            ));
        }

        if !change.owner_matches(&current.record) {
            return Err(Error::conflict(
                id.as_str(),
                format!(
                    "task is held by {}",
                    current.record.holder().unwrap_or("nobody")
                ),
            ));
        }

        let operation = change.operation();
        let agent_id = change.agent_id().to_string();
        let next = change.apply(current.record, Utc::now());

        let stored = self
            .records
            .put(id.as_str(), next, current.version)
            .await
            .inspect_err(|e| {
                warn!(task_id = %id, agent_id = %agent_id, operation, error = %e, "Transition lost a race");
            })?;

        debug!(
            task_id = %id,
            agent_id = %agent_id,
            operation,
            status = %stored.record.status,
            version = stored.version,
            "Task transitioned"
        );
        Ok(stored.record)
    }

    /// Number of stored tasks.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn len(&self) -> Result<usize> {
        self.records.len().await
    }

    /// Check if no task has been published.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn is_empty(&self) -> Result<bool> {
        self.records.is_empty().await
    }

    /// Every task, oldest first, for serialisation.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn snapshot(&self) -> Result<Vec<Task>> {
        let mut tasks = self.list(&TaskFilter::all()).await?;
        tasks.reverse();
        Ok(tasks)
    }

    /// Load previously snapshotted tasks.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if a task violates a record invariant and
    /// `Error::Conflict` if an id is already present.
    pub async fn restore(&self, tasks: Vec<Task>) -> Result<usize> {
        tasks.iter().try_for_each(Task::check_invariants)?;

        let mut restored = 0usize;
        for task in tasks {
            let key = task.id.to_string();
            self.records.insert(&key, task).await?;
            restored = restored.saturating_add(1);
        }
        info!(count = restored, "Restored tasks");
        Ok(restored)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::arithmetic_side_effects, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn spec(title: &str) -> TaskSpec {
        TaskSpec::new(title, "some work").created_by("publisher")
    }

    fn assign(agent: &str) -> Change {
        Change::Assign {
            agent_id: agent.to_string(),
            eta: Some("1 hour".to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_assigns_prefixed_id() {
        let store = TaskStore::in_memory();
        let task = store.create(&spec("first")).await.unwrap();

        assert!(task.id.as_str().starts_with("TASK-"));
        assert_eq!(task.status, TaskStatus::Open);
        assert_eq!(store.get(&task.id).await.unwrap(), task);
    }

    #[tokio::test]
    async fn test_create_rejects_blank_title() {
        let store = TaskStore::in_memory();
        let result = store.create(&TaskSpec::new("", "d")).await;
        assert!(matches!(result, Err(Error::Validation { .. })));
        assert!(store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_get_missing_task() {
        let store = TaskStore::in_memory();
        let result = store.get(&TaskId::from("TASK-NOPE")).await;
        assert!(matches!(result, Err(Error::TaskNotFound { .. })));
    }

    #[tokio::test]
    async fn test_list_most_recent_first() {
        let store = TaskStore::in_memory();
        let a = store.create(&spec("a")).await.unwrap();
        let b = store.create(&spec("b")).await.unwrap();
        let c = store.create(&spec("c")).await.unwrap();

        let ids: Vec<_> = store
            .list(&TaskFilter::all())
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![c.id, b.id, a.id]);
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let store = TaskStore::in_memory();
        let a = store.create(&spec("a")).await.unwrap();
        store.create(&spec("b")).await.unwrap();
        store
            .transition(&a.id, TaskStatus::Open, assign("agent-1"))
            .await
            .unwrap();

        let open = store
            .list(&TaskFilter::all().with_status(TaskStatus::Open))
            .await
            .unwrap();
        assert_eq!(open.len(), 1);

        let held = store
            .list(&TaskFilter::all().with_assigned_to("agent-1"))
            .await
            .unwrap();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].id, a.id);
    }

    #[tokio::test]
    async fn test_stale_expected_status_conflicts_without_mutation() {
        let store = TaskStore::in_memory();
        let task = store.create(&spec("a")).await.unwrap();
        store
            .transition(&task.id, TaskStatus::Open, assign("agent-1"))
            .await
            .unwrap();

        let result = store
            .transition(&task.id, TaskStatus::Open, assign("agent-2"))
            .await;
        assert!(matches!(result, Err(Error::Conflict { .. })));

        let current = store.get(&task.id).await.unwrap();
        assert_eq!(current.holder(), Some("agent-1"));
        assert_eq!(current.history.len(), 2);
    }

    #[tokio::test]
    async fn test_change_not_permitted_from_expected_is_invalid_state() {
        let store = TaskStore::in_memory();
        let task = store.create(&spec("a")).await.unwrap();
        let result = store
            .transition(
                &task.id,
                TaskStatus::Open,
                Change::Start {
                    agent_id: "agent-1".to_string(),
                },
            )
            .await;
        assert!(matches!(result, Err(Error::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_wrong_owner_conflicts() {
        let store = TaskStore::in_memory();
        let task = store.create(&spec("a")).await.unwrap();
        store
            .transition(&task.id, TaskStatus::Open, assign("agent-1"))
            .await
            .unwrap();

        let result = store
            .transition(
                &task.id,
                TaskStatus::Assigned,
                Change::Start {
                    agent_id: "agent-2".to_string(),
                },
            )
            .await;
        assert!(matches!(result, Err(Error::Conflict { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_transitions_single_winner() {
        let store = Arc::new(TaskStore::in_memory());
        let task = store.create(&spec("race")).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|n| {
                let store = Arc::clone(&store);
                let id = task.id.clone();
                tokio::spawn(async move {
                    store
                        .transition(&id, TaskStatus::Open, assign(&format!("agent-{n}")))
                        .await
                })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            match handle.await.expect("task panicked") {
                Ok(_) => winners += 1,
                Err(e) => assert!(e.is_retryable(), "unexpected error: {e}"),
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(store.get(&task.id).await.unwrap().history.len(), 2);
    }

    #[tokio::test]
    async fn test_snapshot_restore_round_trip() {
        let store = TaskStore::in_memory();
        let a = store.create(&spec("a")).await.unwrap();
        store.create(&spec("b")).await.unwrap();
        store
            .transition(&a.id, TaskStatus::Open, assign("agent-1"))
            .await
            .unwrap();

        let snapshot = store.snapshot().await.unwrap();
        let json = serde_json::to_string(&snapshot).unwrap();
        let decoded: Vec<Task> = serde_json::from_str(&json).unwrap();

        let restored = TaskStore::in_memory();
        assert_eq!(restored.restore(decoded).await.unwrap(), 2);
        assert_eq!(restored.snapshot().await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_restore_rejects_broken_record() {
        let store = TaskStore::in_memory();
        let mut task = store.create(&spec("a")).await.unwrap();
        task.status = TaskStatus::Assigned;

        let fresh = TaskStore::in_memory();
        let result = fresh.restore(vec![task]).await;
        assert!(matches!(result, Err(Error::Validation { .. })));
        assert!(fresh.is_empty().await.unwrap());
    }
}
