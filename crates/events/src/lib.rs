//! Task lifecycle notifications.
//!
//! The assignment engine never delivers messages itself. It emits
//! [`TaskEvent`]s into an [`EventSink`]; fan-out to interested agents is the
//! sink's job.
//!
//! - **Event types**: one variant per lifecycle notification, carrying the affected task
//! - **Event store**: append-only log of every emitted event
//! - **Event bus**: pub/sub with pattern subscriptions
//!
//! # Example
//!
//! ```ignore
//! use guild_events::{EventBus, EventPattern, InMemoryEventStore, TaskEvent};
//! use std::sync::Arc;
//!
//! let bus = EventBus::new(Arc::new(InMemoryEventStore::new()));
//! let mut escalations = bus.subscribe_with_pattern(EventPattern::by_type("TASK_ESCALATED")).await.1;
//!
//! // ... engine emits into `bus` ...
//! let event = escalations.recv().await?;
//! println!("re-opened: {}", event.task().id);
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod bus;
pub mod error;
pub mod event;
pub mod sink;
pub mod store;

pub use bus::{EventBus, EventBusBuilder, EventPattern, EventSubscription};
pub use error::{Error, Result};
pub use event::{EventId, TaskEvent};
pub use sink::{EventSink, NoopSink, RecordingSink};
pub use store::{EventStore, InMemoryEventStore};
