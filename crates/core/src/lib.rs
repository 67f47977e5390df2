//! # guild-core
//!
//! Core types, errors, and the task state machine shared by every Guild crate.
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

pub mod agent;
pub mod error;
pub mod id;
pub mod task;

pub use agent::{AgentRecord, Outcome, MAX_REPUTATION};
pub use error::{Error, ErrorKind, Result};
pub use id::TaskId;
pub use task::{
    HistoryAction, HistoryEntry, Priority, Task, TaskFilter, TaskSpec, TaskStatus,
};
