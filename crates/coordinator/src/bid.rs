//! Bid selection among agents interested in the same task.
//!
//! Selection is a pluggable policy. The default [`ReputationEtaPolicy`] keeps
//! bids whose capabilities intersect the task's requirements and scores them
//! as `reputation * 10 - eta_hours`, highest first, earliest bid winning ties.
//!
//! # Example
//!
//! ```ignore
//! use guild_coordinator::{Bid, BidEvaluator};
//!
//! let evaluator = BidEvaluator::default();
//! match evaluator.select(&task, &bids) {
//!     Some(winner) => engine.accept(&task.id, &winner.bid.agent_id, Some(winner.bid.eta.clone())).await?,
//!     None => println!("no eligible bids"),
//! };
//! ```

use serde::{Deserialize, Serialize};

use guild_core::{Task, TaskId};

/// Reputation weight in the default score.
const REPUTATION_WEIGHT: i64 = 10;

/// A candidate's offer to perform a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bid {
    pub agent_id: String,
    pub task_id: TaskId,
    /// Free-form estimate such as `"2 hours"`.
    pub eta: String,
    pub reputation: u32,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl Bid {
    /// Create a bid with no declared capabilities.
    pub fn new(
        agent_id: impl Into<String>,
        task_id: TaskId,
        eta: impl Into<String>,
        reputation: u32,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            task_id,
            eta: eta.into(),
            reputation,
            capabilities: Vec::new(),
        }
    }

    /// Declare the bidder's capabilities.
    #[must_use]
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }
}

/// A bid and the score a policy gave it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoredBid {
    pub bid: Bid,
    pub score: i64,
}

/// Trait for bid selection policies.
pub trait BidPolicy: Send + Sync {
    /// Get policy name.
    fn name(&self) -> &'static str;

    /// Check if a bid may compete for `task` at all.
    fn is_eligible(&self, task: &Task, bid: &Bid) -> bool;

    /// Score an eligible bid. Higher is better.
    fn score(&self, task: &Task, bid: &Bid) -> i64;

    /// Eligible bids, best first. Equal scores keep submission order.
    fn rank(&self, task: &Task, bids: &[Bid]) -> Vec<ScoredBid> {
        let mut ranked: Vec<ScoredBid> = bids
            .iter()
            .filter(|bid| self.is_eligible(task, bid))
            .map(|bid| ScoredBid {
                bid: bid.clone(),
                score: self.score(task, bid),
            })
            .collect();
        ranked.sort_by(|a, b| b.score.cmp(&a.score));
        ranked
    }

    /// The winning bid, if any bid is eligible.
    fn select(&self, task: &Task, bids: &[Bid]) -> Option<ScoredBid> {
        self.rank(task, bids).into_iter().next()
    }
}

/// Capability match, then `reputation * 10 - eta_hours`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReputationEtaPolicy;

impl ReputationEtaPolicy {
    /// Create the default policy.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl BidPolicy for ReputationEtaPolicy {
    fn name(&self) -> &'static str {
        "reputation_eta"
    }

    fn is_eligible(&self, task: &Task, bid: &Bid) -> bool {
        bid.task_id == task.id
            && (task.requirements.is_empty()
                || bid
                    .capabilities
                    .iter()
                    .any(|cap| task.requirements.contains(cap)))
    }

    fn score(&self, _task: &Task, bid: &Bid) -> i64 {
        i64::from(bid.reputation)
            .saturating_mul(REPUTATION_WEIGHT)
            .saturating_sub(parse_eta_hours(&bid.eta))
    }
}

/// Applies a [`BidPolicy`] to a selection round.
pub struct BidEvaluator {
    policy: Box<dyn BidPolicy>,
}

impl std::fmt::Debug for BidEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BidEvaluator")
            .field("policy", &self.policy.name())
            .finish()
    }
}

impl Default for BidEvaluator {
    fn default() -> Self {
        Self::new(Box::new(ReputationEtaPolicy::new()))
    }
}

impl BidEvaluator {
    /// Create an evaluator using `policy`.
    #[must_use]
    pub fn new(policy: Box<dyn BidPolicy>) -> Self {
        Self { policy }
    }

    /// Name of the active policy.
    #[must_use]
    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Eligible bids, best first.
    #[must_use]
    pub fn rank(&self, task: &Task, bids: &[Bid]) -> Vec<ScoredBid> {
        self.policy.rank(task, bids)
    }

    /// The winning bid, or `None` when no bid is eligible.
    #[must_use]
    pub fn select(&self, task: &Task, bids: &[Bid]) -> Option<ScoredBid> {
        let winner = self.policy.select(task, bids);
        match &winner {
            Some(w) => tracing::debug!(
                task_id = %task.id,
                agent_id = %w.bid.agent_id,
                score = w.score,
                candidates = bids.len(),
                "Selected bid"
            ),
            None => tracing::debug!(task_id = %task.id, candidates = bids.len(), "No eligible bids"),
        }
        winner
    }
}

/// Whole hours at the start of an ETA string.
///
/// Leading whitespace is skipped and an optional sign is honoured; anything
/// without leading digits counts as 0 hours. `"2 hours"` is 2, `"1.5h"` is 1.
#[must_use]
pub fn parse_eta_hours(eta: &str) -> i64 {
    let trimmed = eta.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, trimmed.get(1..).unwrap_or_default()),
        Some(b'+') => (false, trimmed.get(1..).unwrap_or_default()),
        _ => (false, trimmed),
    };

    let magnitude = rest
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |acc, digit| {
            acc.saturating_mul(10)
                .saturating_add(i64::from(digit.saturating_sub(b'0')))
        });

    if negative { magnitude.saturating_neg() } else { magnitude }
}
