//! # Guild
//!
//! Command-line front end for the task assignment engine. Tasks and agent
//! ledgers live in one JSON state file in a data directory between
//! invocations.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub use guild_coordinator;
pub use guild_core;
pub use guild_events;

pub mod cli;
pub mod commands;
pub mod state;
