//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Guild - task lifecycle and assignment engine
#[derive(Parser, Debug)]
#[command(name = "guild")]
#[command(version)]
#[command(about = "Publish, claim and complete tasks across a pool of autonomous agents")]
#[command(
    long_about = "Guild keeps tasks and agent reputation in a data directory. Every command prints JSON on stdout and exits non-zero on any error."
)]
pub struct Cli {
    /// Directory holding state.json
    #[arg(long, global = true, default_value = ".guild")]
    pub data_dir: PathBuf,

    /// TOML configuration file (defaults apply when absent)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Publish a new task
    Publish {
        /// Task title
        title: String,

        /// Task description
        description: String,

        /// Required capability tag (repeatable)
        #[arg(short, long = "requirement")]
        requirements: Vec<String>,

        /// Priority (low, medium, high)
        #[arg(short, long, default_value = "medium")]
        priority: String,

        /// Publisher id
        #[arg(long)]
        created_by: Option<String>,
    },

    /// Claim an open task
    Accept {
        /// Task id
        task_id: String,

        /// Agent id
        agent: String,

        /// Estimated time to completion, e.g. "2 hours"
        #[arg(short, long)]
        eta: Option<String>,
    },

    /// Start working on an assigned task
    Start {
        /// Task id
        task_id: String,

        /// Agent id
        agent: String,
    },

    /// Complete a task in progress
    Complete {
        /// Task id
        task_id: String,

        /// Agent id
        agent: String,

        /// Result payload; parsed as JSON when possible, otherwise stored as a string
        #[arg(short, long, default_value = "{}")]
        result: String,
    },

    /// Report failure and re-open a task
    Fail {
        /// Task id
        task_id: String,

        /// Agent id
        agent: String,

        /// Failure reason
        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Show one task
    Show {
        /// Task id
        task_id: String,
    },

    /// List tasks, most recent first
    List {
        /// Filter by status (open, assigned, in-progress, completed)
        #[arg(long)]
        status: Option<String>,

        /// Filter by holding agent
        #[arg(long)]
        assigned_to: Option<String>,

        /// Filter by publisher
        #[arg(long)]
        created_by: Option<String>,
    },

    /// List open tasks an agent can handle
    Browse {
        /// Agent capability (repeatable; none means any task)
        #[arg(short, long = "capability")]
        capabilities: Vec<String>,
    },

    /// List agents by reputation
    Agents,

    /// Show one agent's ledger
    Agent {
        /// Agent id
        agent_id: String,
    },

    /// Show aggregate statistics
    Stats,

    /// Pick the winning bid for a task
    SelectBid {
        /// Task id
        task_id: String,

        /// JSON file holding an array of bids
        #[arg(short, long)]
        bids: PathBuf,

        /// Claim the task for the winner
        #[arg(long, default_value_t = false)]
        assign: bool,
    },
}

impl Commands {
    /// Check if the command changes stored state.
    #[must_use]
    pub const fn is_mutating(&self) -> bool {
        match self {
            Self::Publish { .. }
            | Self::Accept { .. }
            | Self::Start { .. }
            | Self::Complete { .. }
            | Self::Fail { .. } => true,
            Self::SelectBid { assign, .. } => *assign,
            Self::Show { .. }
            | Self::List { .. }
            | Self::Browse { .. }
            | Self::Agents
            | Self::Agent { .. }
            | Self::Stats => false,
        }
    }
}
