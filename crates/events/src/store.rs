//! Event store trait and implementations.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use guild_core::TaskId;

use crate::error::Result;
use crate::event::{EventId, TaskEvent};

/// Trait for append-only event storage backends.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append an event to the store.
    async fn append(&self, event: TaskEvent) -> Result<EventId>;

    /// Read events after a given event ID, or all events when `from` is `None`.
    async fn read(&self, from: Option<EventId>) -> Result<Vec<TaskEvent>>;

    /// Read events for a specific task, in emission order.
    async fn read_for_task(&self, task_id: &TaskId) -> Result<Vec<TaskEvent>>;

    /// Get the total number of events.
    async fn count(&self) -> Result<usize>;
}

#[derive(Default)]
struct Log {
    events: Vec<TaskEvent>,
    task_index: HashMap<TaskId, Vec<usize>>,
}

/// In-memory event store.
#[derive(Default)]
pub struct InMemoryEventStore {
    log: RwLock<Log>,
}

impl InMemoryEventStore {
    /// Create a new in-memory event store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new in-memory event store wrapped in an Arc.
    #[must_use]
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: TaskEvent) -> Result<EventId> {
        let event_id = event.event_id();
        let task_id = event.task_id().clone();

        let mut log = self.log.write().await;
        let index = log.events.len();
        log.events.push(event);
        log.task_index.entry(task_id).or_default().push(index);

        Ok(event_id)
    }

    async fn read(&self, from: Option<EventId>) -> Result<Vec<TaskEvent>> {
        let log = self.log.read().await;

        let start = from
            .and_then(|from_id| log.events.iter().position(|e| e.event_id() == from_id))
            .map_or(0, |pos| pos.saturating_add(1));

        Ok(log.events.iter().skip(start).cloned().collect())
    }

    async fn read_for_task(&self, task_id: &TaskId) -> Result<Vec<TaskEvent>> {
        let log = self.log.read().await;

        Ok(log
            .task_index
            .get(task_id)
            .map(|indices| {
                indices
                    .iter()
                    .filter_map(|&i| log.events.get(i).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.log.read().await.events.len())
    }
}
