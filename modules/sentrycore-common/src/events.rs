//! Queue names and event payloads crossing component boundaries.
//!
//! Payloads carry only IDs; consumers reload entities from the store so a
//! stale payload can never overwrite fresher state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::PushDecision;

/// Work queue names, one per independently-parallel worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Queue {
    Ingest,
    Embed,
    Match,
    Agent,
    Email,
}

impl Queue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Queue::Ingest => "q_ingest",
            Queue::Embed => "q_embed",
            Queue::Match => "q_match",
            Queue::Agent => "q_agent",
            Queue::Email => "q_email",
        }
    }

    pub fn all() -> [Queue; 5] {
        [
            Queue::Ingest,
            Queue::Embed,
            Queue::Match,
            Queue::Agent,
            Queue::Email,
        ]
    }
}

/// Raised by the match engine for every successfully computed match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchComputed {
    pub goal_id: Uuid,
    pub item_id: Uuid,
    pub score: f64,
}

/// What woke the decision pipeline up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DecisionTrigger {
    MatchComputed(MatchComputed),
    BatchWindowTick { goal_id: Uuid, window: String },
    DigestTick { goal_id: Uuid },
}

impl DecisionTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionTrigger::MatchComputed(_) => "MATCH_COMPUTED",
            DecisionTrigger::BatchWindowTick { .. } => "BATCH_WINDOW_TICK",
            DecisionTrigger::DigestTick { .. } => "DIGEST_TICK",
        }
    }
}

/// Output of the decision pipeline, consumed by the coalescer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionProposal {
    pub decision_id: Uuid,
    pub goal_id: Uuid,
    pub item_id: Uuid,
    pub decision: PushDecision,
    pub score: f64,
    pub topic_key: String,
    pub dedupe_key: String,
    pub decided_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_names_are_stable() {
        assert_eq!(Queue::Ingest.as_str(), "q_ingest");
        assert_eq!(Queue::all().len(), 5);
    }

    #[test]
    fn trigger_names_match_schema() {
        let trigger = DecisionTrigger::MatchComputed(MatchComputed {
            goal_id: Uuid::new_v4(),
            item_id: Uuid::new_v4(),
            score: 0.9,
        });
        assert_eq!(trigger.as_str(), "MATCH_COMPUTED");
    }
}
