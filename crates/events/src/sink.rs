//! Event sinks: where the engine hands off notifications.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::event::TaskEvent;

/// Receiver of engine notifications.
///
/// Emission never fails from the engine's point of view; a sink that cannot
/// deliver is responsible for logging or retrying on its own.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Hand off one event.
    async fn emit(&self, event: TaskEvent);
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

#[async_trait]
impl EventSink for NoopSink {
    async fn emit(&self, event: TaskEvent) {
        tracing::trace!(event_type = event.event_type(), "Dropping event");
    }
}

/// Sink that keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TaskEvent>>,
}

impl RecordingSink {
    /// Create an empty recording sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far.
    pub async fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().await.clone()
    }

    /// Event type names recorded so far.
    pub async fn event_types(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .await
            .iter()
            .map(TaskEvent::event_type)
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn emit(&self, event: TaskEvent) {
        self.events.lock().await.push(event);
    }
}
