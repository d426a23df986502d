//! Shared state threaded through the decision pipeline nodes.

use serde::{Deserialize, Serialize};

use sentrycore_common::events::{ActionProposal, DecisionTrigger};
use sentrycore_common::types::*;
use sentrycore_common::Thresholds;

/// Decision buckets produced by thresholding the match score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionBucket {
    /// score >= immediate threshold: fire to the coalescer now.
    Immediate,
    /// boundary_low <= score < immediate: consult the boundary judge.
    Boundary,
    /// batch <= score < boundary_low: queue until the next batch window.
    Batch,
    /// score < batch: drop but persist.
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockReason {
    BlockedSource,
    NegativeTerm,
    StrictNoHit,
    BudgetExhausted,
}

/// Mutable record shared by all nodes in one pipeline run. Non-LLM nodes are
/// deterministic over this state; nothing touches the store until
/// EmitActions.
pub struct AgentState {
    pub trigger: DecisionTrigger,
    pub goal: Goal,
    pub push_config: GoalPushConfig,
    pub item: Item,
    pub source_name: String,
    pub match_row: GoalItemMatch,
    pub budget_flags: BudgetFlags,
    pub thresholds: Thresholds,

    /// Whether LLM nodes may call out this run.
    pub llm_enabled: bool,
    /// Whether an LLM was actually consulted.
    pub llm_used: bool,
    pub fallback_reason: Option<String>,
    pub block_reasons: Vec<BlockReason>,
    pub bucket: Option<DecisionBucket>,
    /// Judge outputs and other evidence accumulated for reason_json.
    pub evidence: Vec<serde_json::Value>,

    /// Decision drafts pending persistence in EmitActions.
    pub drafts: Vec<DecisionDraft>,
    /// Persisted proposals, handed to the coalescer by the caller.
    pub proposals: Vec<ActionProposal>,
}

pub struct DecisionDraft {
    pub decision: PushDecision,
}

impl AgentState {
    pub fn score(&self) -> f64 {
        self.match_row.match_score
    }

    pub fn features(&self) -> &MatchFeatures {
        &self.match_row.features
    }

    pub fn block(&mut self, reason: BlockReason) {
        self.block_reasons.push(reason);
        self.drafts.push(DecisionDraft {
            decision: PushDecision::Ignore,
        });
    }

    pub fn note(&mut self, evidence: serde_json::Value) {
        self.evidence.push(evidence);
    }

    /// The reason payload persisted on the decision row.
    pub fn reason_json(&self) -> serde_json::Value {
        serde_json::json!({
            "score": self.score(),
            "features": self.match_row.features,
            "matched_terms": self.match_row.reasons.matched_terms,
            "source_name": self.match_row.reasons.source_name,
            "block_reasons": self.block_reasons,
            "llm_used": self.llm_used,
            "fallback_reason": self.fallback_reason,
            "evidence": self.evidence,
        })
    }
}
