//! Event bus for pub/sub fan-out of task notifications.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, warn};

use guild_core::TaskId;

use crate::error::{Error, Result};
use crate::event::{EventId, TaskEvent};
use crate::sink::EventSink;
use crate::store::EventStore;

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 128;

/// Pattern-based subscriber.
struct Subscriber {
    sender: broadcast::Sender<TaskEvent>,
    pattern: EventPattern,
}

/// Subscription handle for receiving events.
pub struct EventSubscription {
    receiver: broadcast::Receiver<TaskEvent>,
}

impl EventSubscription {
    /// Receive the next event.
    ///
    /// # Errors
    ///
    /// Returns `Error::Lagged` if the subscriber fell behind the channel
    /// capacity, or `Error::ChannelClosed` once the bus is gone.
    pub async fn recv(&mut self) -> Result<TaskEvent> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Lagged(skipped) => Error::Lagged { skipped },
            broadcast::error::RecvError::Closed => Error::ChannelClosed,
        })
    }

    /// Try to receive an event without waiting.
    ///
    /// # Errors
    ///
    /// Returns `Error::ChannelClosed` if nothing is pending or the bus is gone.
    pub fn try_recv(&mut self) -> Result<TaskEvent> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Lagged(skipped) => Error::Lagged { skipped },
            broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed => {
                Error::ChannelClosed
            }
        })
    }
}

/// Pattern for filtering events.
#[derive(Debug, Clone)]
pub enum EventPattern {
    /// Match all events.
    All,
    /// Match events by type name, e.g. `TASK_ESCALATED`.
    ByType(String),
    /// Match events by task ID.
    ByTask(TaskId),
    /// Match events by any of several type names.
    ByTypes(Vec<String>),
}

impl EventPattern {
    /// Pattern for a single event type.
    pub fn by_type(event_type: impl Into<String>) -> Self {
        Self::ByType(event_type.into())
    }

    /// Check if an event matches this pattern.
    #[must_use]
    pub fn matches(&self, event: &TaskEvent) -> bool {
        match self {
            Self::All => true,
            Self::ByType(t) => event.event_type() == t,
            Self::ByTask(id) => event.task_id() == id,
            Self::ByTypes(types) => types.iter().any(|t| event.event_type() == t),
        }
    }
}

/// Event bus for publishing and subscribing to task events.
///
/// Every published event is appended to the underlying store before it is
/// fanned out, so late subscribers can catch up with [`EventBus::replay_from`].
pub struct EventBus {
    /// Underlying event store.
    store: Arc<dyn EventStore>,
    /// Broadcast sender for all events.
    broadcast: broadcast::Sender<TaskEvent>,
    /// Pattern-based subscribers.
    subscribers: RwLock<HashMap<String, Subscriber>>,
    /// Next subscriber ID.
    next_id: AtomicU64,
}

impl EventBus {
    /// Create a new event bus with the given store.
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        let (broadcast, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Self {
            store,
            broadcast,
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Publish an event.
    ///
    /// The event is stored and broadcast to all subscribers.
    ///
    /// # Errors
    ///
    /// Returns an error if the event store rejects the append.
    pub async fn publish(&self, event: TaskEvent) -> Result<EventId> {
        let event_id = self.store.append(event.clone()).await?;

        debug!(
            event_id = %event_id,
            event_type = event.event_type(),
            task_id = %event.task_id(),
            "Publishing event"
        );

        // No receivers is not an error for a broadcast.
        let _ = self.broadcast.send(event.clone());

        let closed: Vec<String> = {
            let subscribers = self.subscribers.read().await;
            subscribers
                .iter()
                .filter(|(_, sub)| sub.pattern.matches(&event))
                .filter_map(|(id, sub)| sub.sender.send(event.clone()).err().map(|_| id.clone()))
                .collect()
        };

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in &closed {
                subscribers.remove(id);
                debug!(subscriber_id = %id, "Removed dropped subscriber");
            }
        }

        Ok(event_id)
    }

    /// Subscribe to all events.
    #[must_use]
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            receiver: self.broadcast.subscribe(),
        }
    }

    /// Subscribe to events matching a pattern.
    pub async fn subscribe_with_pattern(
        &self,
        pattern: EventPattern,
    ) -> (String, EventSubscription) {
        let (sender, receiver) = broadcast::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let id = format!("sub_{}", self.next_id.fetch_add(1, Ordering::Relaxed));

        self.subscribers
            .write()
            .await
            .insert(id.clone(), Subscriber { sender, pattern });

        (id, EventSubscription { receiver })
    }

    /// Unsubscribe a pattern-based subscriber.
    pub async fn unsubscribe(&self, subscriber_id: &str) {
        self.subscribers.write().await.remove(subscriber_id);
    }

    /// Number of live pattern-based subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Replay events after a given event ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the event store cannot be read.
    pub async fn replay_from(&self, from: Option<EventId>) -> Result<Vec<TaskEvent>> {
        self.store.read(from).await
    }

    /// Get the underlying event store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }
}

#[async_trait]
impl EventSink for EventBus {
    async fn emit(&self, event: TaskEvent) {
        let event_type = event.event_type();
        let task_id = event.task_id().clone();
        if let Err(err) = self.publish(event).await {
            warn!(event_type, task_id = %task_id, error = %err, "Failed to publish event");
        }
    }
}

/// Builder for `EventBus`.
pub struct EventBusBuilder {
    store: Option<Arc<dyn EventStore>>,
    channel_capacity: usize,
}

impl EventBusBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Set the event store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the broadcast channel capacity.
    #[must_use]
    pub const fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Build the event bus.
    ///
    /// # Errors
    ///
    /// Returns an error if no store is configured or the capacity is zero.
    pub fn build(self) -> Result<EventBus> {
        let store = self
            .store
            .ok_or_else(|| Error::invalid_config("no event store configured"))?;

        if self.channel_capacity == 0 {
            return Err(Error::invalid_config("channel capacity must be greater than 0"));
        }

        let (broadcast, _) = broadcast::channel(self.channel_capacity);

        Ok(EventBus {
            store,
            broadcast,
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        })
    }
}

impl Default for EventBusBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::InMemoryEventStore;
    use chrono::Utc;
    use guild_core::{Task, TaskSpec};

    fn setup_bus() -> EventBus {
        EventBus::new(InMemoryEventStore::new_arc())
    }

    fn task(id: &str) -> Task {
        Task::open(TaskId::from(id), &TaskSpec::new("t", "d"), Utc::now())
    }

    // ==========================================================================
    // EventPattern BEHAVIORAL TESTS
    // ==========================================================================

    #[test]
    fn should_match_all_events_with_all_pattern() {
        let event = TaskEvent::published(task("TASK-1"));
        assert!(EventPattern::All.matches(&event));
    }

    #[test]
    fn should_match_event_by_exact_type() {
        let event = TaskEvent::escalated(task("TASK-1"));
        assert!(EventPattern::by_type("TASK_ESCALATED").matches(&event));
        assert!(!EventPattern::by_type("TASK_PUBLISHED").matches(&event));
    }

    #[test]
    fn should_match_event_by_task_id() {
        let event = TaskEvent::published(task("TASK-1"));
        assert!(EventPattern::ByTask(TaskId::from("TASK-1")).matches(&event));
        assert!(!EventPattern::ByTask(TaskId::from("TASK-2")).matches(&event));
    }

    #[test]
    fn should_match_event_by_multiple_types() {
        let event = TaskEvent::published(task("TASK-1"));
        let pattern = EventPattern::ByTypes(vec![
            "TASK_PUBLISHED".to_string(),
            "TASK_ESCALATED".to_string(),
        ]);
        assert!(pattern.matches(&event));
        assert!(!EventPattern::ByTypes(vec!["TASK_COMPLETED".to_string()]).matches(&event));
    }

    // ==========================================================================
    // EventBusBuilder BEHAVIORAL TESTS
    // ==========================================================================

    #[test]
    fn should_fail_to_build_without_store() {
        assert!(EventBusBuilder::new().build().is_err());
    }

    #[test]
    fn should_fail_to_build_with_zero_capacity() {
        let result = EventBusBuilder::new()
            .with_store(InMemoryEventStore::new_arc())
            .with_channel_capacity(0)
            .build();
        assert!(result.is_err());
    }

    // ==========================================================================
    // EventBus BEHAVIORAL TESTS
    // ==========================================================================

    #[tokio::test]
    async fn should_store_and_broadcast_published_event() {
        let bus = setup_bus();
        let mut sub = bus.subscribe();

        bus.publish(TaskEvent::published(task("TASK-1"))).await.unwrap();

        let received = sub.recv().await.unwrap();
        assert_eq!(received.task_id().as_str(), "TASK-1");
        assert_eq!(bus.store().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn should_deliver_only_matching_events_to_pattern_subscriber() {
        let bus = setup_bus();
        let (_, mut escalations) = bus
            .subscribe_with_pattern(EventPattern::by_type("TASK_ESCALATED"))
            .await;

        bus.publish(TaskEvent::published(task("TASK-1"))).await.unwrap();
        bus.publish(TaskEvent::escalated(task("TASK-1"))).await.unwrap();

        let received = escalations.recv().await.unwrap();
        assert_eq!(received.event_type(), "TASK_ESCALATED");
        assert!(escalations.try_recv().is_err());
    }

    #[tokio::test]
    async fn should_drop_subscriber_whose_receiver_is_gone() {
        let bus = setup_bus();
        let (_, sub) = bus.subscribe_with_pattern(EventPattern::All).await;
        drop(sub);

        bus.publish(TaskEvent::published(task("TASK-1"))).await.unwrap();
        assert_eq!(bus.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn should_replay_events_in_order() {
        let bus = setup_bus();
        bus.emit(TaskEvent::published(task("TASK-1"))).await;
        bus.emit(TaskEvent::published(task("TASK-2"))).await;

        let replayed = bus.replay_from(None).await.unwrap();
        let ids: Vec<_> = replayed.iter().map(|e| e.task_id().to_string()).collect();
        assert_eq!(ids, vec!["TASK-1", "TASK-2"]);
    }

    #[tokio::test]
    async fn should_unsubscribe() {
        let bus = setup_bus();
        let (id, _sub) = bus.subscribe_with_pattern(EventPattern::All).await;
        assert_eq!(bus.subscriber_count().await, 1);
        bus.unsubscribe(&id).await;
        assert_eq!(bus.subscriber_count().await, 0);
    }
}
