//! # guild-coordinator
//!
//! Task lifecycle and assignment engine.
//!
//! ```text
//! AssignmentEngine ──> TaskStore ──────> RecordStore<Task>
//!        │                                  (compare-and-swap per key)
//!        └──────────> AgentRegistry ──> RecordStore<AgentRecord>
//!                          └─ ReputationScorer
//! ```
//!
//! [`BidEvaluator`] sits outside this flow: a coordination loop uses it to
//! pick among interested agents before calling [`AssignmentEngine::accept`].
//!
//! ## Zero Panic Guarantee
//!
//! This crate enforces:
//! - `#![deny(clippy::unwrap_used)]`
//! - `#![deny(clippy::expect_used)]`
//! - `#![forbid(clippy::panic)]`

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod bid;
pub mod config;
pub mod engine;
pub mod record_store;
pub mod registry;
pub mod reputation;
pub mod task_store;
pub mod transition;

pub use bid::{parse_eta_hours, Bid, BidEvaluator, BidPolicy, ReputationEtaPolicy, ScoredBid};
pub use config::{EventsConfig, GuildConfig, ReputationConfig, StoreConfig};
pub use engine::{AssignmentEngine, EngineStats};
pub use record_store::{InMemoryRecordStore, RecordStore, Versioned};
pub use registry::AgentRegistry;
pub use reputation::ReputationScorer;
pub use task_store::TaskStore;
pub use transition::Change;
