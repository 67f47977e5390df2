//! Reputation scoring policy.

use guild_core::{AgentRecord, Outcome};

use crate::config::ReputationConfig;

/// Pure scoring policy applied to an agent ledger on each outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReputationScorer {
    config: ReputationConfig,
}

impl ReputationScorer {
    /// Create a scorer with the given parameters.
    #[must_use]
    pub const fn new(config: ReputationConfig) -> Self {
        Self { config }
    }

    /// Reputation given to an agent with no ledger yet.
    #[must_use]
    pub const fn initial(&self) -> u32 {
        self.config.initial
    }

    /// Next reputation after `outcome`, clamped to the configured bounds.
    #[must_use]
    pub fn next_reputation(&self, current: u32, outcome: Outcome) -> u32 {
        match outcome {
            Outcome::Success => current
                .saturating_add(self.config.success_reward)
                .min(self.config.ceiling),
            Outcome::Failure => current
                .saturating_sub(self.config.failure_penalty)
                .max(self.config.floor),
        }
    }

    /// Apply one outcome to a ledger record.
    #[must_use]
    pub fn apply(&self, record: &AgentRecord, outcome: Outcome) -> AgentRecord {
        let mut next = record.clone();
        next.total_tasks = next.total_tasks.saturating_add(1);
        match outcome {
            Outcome::Success => next.completed_tasks = next.completed_tasks.saturating_add(1),
            Outcome::Failure => next.failed_tasks = next.failed_tasks.saturating_add(1),
        }
        next.reputation = self.next_reputation(record.reputation, outcome);
        next
    }
}
