//! Agent reputation ledger.
//!
//! Ledger records are created lazily on the first outcome recorded for an
//! agent id. Each outcome is applied with [`RecordStore::update`], so two
//! outcomes recorded at the same instant for the same agent both land.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use guild_core::{AgentRecord, Error, Outcome, Result};

use crate::config::GuildConfig;
use crate::record_store::{InMemoryRecordStore, RecordStore};
use crate::reputation::ReputationScorer;

/// Agent ledgers over a pluggable [`RecordStore`].
pub struct AgentRegistry {
    records: Arc<dyn RecordStore<AgentRecord>>,
    scorer: ReputationScorer,
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("scorer", &self.scorer)
            .finish_non_exhaustive()
    }
}

impl AgentRegistry {
    /// Create a registry over the given records backend.
    #[must_use]
    pub fn new(records: Arc<dyn RecordStore<AgentRecord>>, scorer: ReputationScorer) -> Self {
        Self { records, scorer }
    }

    /// Create a registry backed by memory.
    #[must_use]
    pub fn in_memory(config: &GuildConfig) -> Self {
        Self::new(
            InMemoryRecordStore::<AgentRecord>::new_arc(),
            ReputationScorer::new(config.reputation),
        )
    }

    /// The scoring policy applied on each outcome.
    #[must_use]
    pub const fn scorer(&self) -> &ReputationScorer {
        &self.scorer
    }

    /// Apply an outcome to an agent's ledger, creating it if needed.
    ///
    /// # Errors
    ///
    /// - `Error::Validation` if `agent_id` is blank.
    /// - Any error the records backend reports.
    pub async fn record_outcome(&self, agent_id: &str, outcome: Outcome) -> Result<AgentRecord> {
        if agent_id.trim().is_empty() {
            return Err(Error::validation("agent id must not be empty"));
        }

        let apply = |current: Option<&AgentRecord>| match current {
            Some(record) => self.scorer.apply(record, outcome),
            None => {
                let fresh = AgentRecord::new(agent_id, self.scorer.initial(), Utc::now());
                self.scorer.apply(&fresh, outcome)
            }
        };
        let stored = self.records.update(agent_id, &apply).await?;

        info!(
            agent_id,
            %outcome,
            reputation = stored.record.reputation,
            total_tasks = stored.record.total_tasks,
            "Recorded outcome"
        );
        Ok(stored.record)
    }

    /// Fetch an agent's ledger.
    ///
    /// # Errors
    ///
    /// Returns `Error::AgentNotFound` if no outcome was ever recorded for it.
    pub async fn get(&self, agent_id: &str) -> Result<AgentRecord> {
        self.records
            .get(agent_id)
            .await?
            .map(|versioned| versioned.record)
            .ok_or_else(|| Error::agent_not_found(agent_id))
    }

    /// Current reputation, or the initial reputation for an unknown agent.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn reputation_of(&self, agent_id: &str) -> Result<u32> {
        Ok(self
            .records
            .get(agent_id)
            .await?
            .map_or(self.scorer.initial(), |versioned| versioned.record.reputation))
    }

    /// Every ledger, highest reputation first, then by id.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn list(&self) -> Result<Vec<AgentRecord>> {
        let mut agents = self.records.values().await?;
        agents.sort_by(|a, b| {
            b.reputation
                .cmp(&a.reputation)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(agents)
    }

    /// Number of known agents.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn len(&self) -> Result<usize> {
        self.records.len().await
    }

    /// Check if no agent has a ledger yet.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn is_empty(&self) -> Result<bool> {
        self.records.is_empty().await
    }

    /// Every ledger ordered by id, for serialisation.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn snapshot(&self) -> Result<Vec<AgentRecord>> {
        let mut agents = self.records.values().await?;
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }

    /// Load previously snapshotted ledgers.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if a record violates a ledger invariant
    /// and `Error::Conflict` if an id is already present.
    pub async fn restore(&self, agents: Vec<AgentRecord>) -> Result<usize> {
        agents.iter().try_for_each(AgentRecord::check_invariants)?;

        let mut restored = 0usize;
        for agent in agents {
            let key = agent.id.clone();
            self.records.insert(&key, agent).await?;
            restored = restored.saturating_add(1);
        }
        info!(count = restored, "Restored agent ledgers");
        Ok(restored)
    }
}
