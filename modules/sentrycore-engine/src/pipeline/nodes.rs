//! The decision pipeline's node chain:
//! RuleGate → Bucket → BoundaryJudge → PushWorthiness → EmitActions.
//!
//! Nodes are transformers over [`AgentState`], run in order with an
//! early-exit sentinel. LLM calls are the only suspension points after the
//! rule gate, and every LLM failure maps to a deterministic fallback — a
//! node never lets a provider error escape the run.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use sentrycore_common::events::ActionProposal;
use sentrycore_common::types::*;
use sentrycore_store::{DecisionRepo, FeedbackRepo};

use crate::budget::{estimate_tokens, BudgetGovernor, BudgetKind};
use crate::coalescer::{coalesce_bucket_label, dedupe_key};
use crate::deps::Deps;
use crate::judge::{fallback_promote, JudgeProvider};
use crate::pipeline::state::{AgentState, BlockReason, DecisionBucket};

pub enum NodeFlow {
    Continue,
    Halt,
}

#[async_trait]
pub trait Node: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, state: &mut AgentState) -> Result<NodeFlow>;
}

// ---------------------------------------------------------------------------
// Node 1 — RuleGate
// ---------------------------------------------------------------------------

/// Deterministic vetoes ahead of any scoring decision.
pub struct RuleGate {
    deps: Deps,
}

impl RuleGate {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Node for RuleGate {
    fn name(&self) -> &'static str {
        "rule_gate"
    }

    async fn run(&self, state: &mut AgentState) -> Result<NodeFlow> {
        let blocked = self
            .deps
            .feedback
            .is_blocked(state.goal.user_id, state.goal.id, state.item.source_id)
            .await?;
        if blocked {
            state.block(BlockReason::BlockedSource);
            return Ok(NodeFlow::Halt);
        }

        if state.score() == 0.0 {
            let features = state.features();
            let reason = if features.negative_hit == 1 {
                BlockReason::NegativeTerm
            } else if state.goal.priority_mode == PriorityMode::Hard && features.must_hit == 0 {
                BlockReason::StrictNoHit
            } else {
                // Affinity-zeroed: the only remaining way to a zero score.
                BlockReason::BlockedSource
            };
            state.block(reason);
            return Ok(NodeFlow::Halt);
        }

        // Budget only gates the LLM here, never the decision itself.
        if state.budget_flags.judge_disabled {
            state.llm_enabled = false;
            state.fallback_reason = Some("judge_disabled".to_string());
        }
        Ok(NodeFlow::Continue)
    }
}

// ---------------------------------------------------------------------------
// Node 2 — Bucket
// ---------------------------------------------------------------------------

/// Threshold partition of the score.
pub struct BucketNode;

#[async_trait]
impl Node for BucketNode {
    fn name(&self) -> &'static str {
        "bucket"
    }

    async fn run(&self, state: &mut AgentState) -> Result<NodeFlow> {
        let score = state.score();
        let t = state.thresholds;
        let bucket = if score >= t.immediate {
            DecisionBucket::Immediate
        } else if score >= t.boundary_low {
            DecisionBucket::Boundary
        } else if score >= t.batch {
            DecisionBucket::Batch
        } else {
            DecisionBucket::Ignore
        };
        debug!(score, ?bucket, "bucketed");
        state.bucket = Some(bucket);

        if bucket == DecisionBucket::Ignore {
            state.drafts.push(super::state::DecisionDraft {
                decision: PushDecision::Ignore,
            });
            return Ok(NodeFlow::Halt);
        }
        Ok(NodeFlow::Continue)
    }
}

// ---------------------------------------------------------------------------
// Node 3 — BoundaryJudge
// ---------------------------------------------------------------------------

/// LLM arbitration of the boundary band, with a deterministic fallback.
pub struct BoundaryJudgeNode {
    judge: Arc<dyn JudgeProvider>,
    governor: Arc<BudgetGovernor>,
}

impl BoundaryJudgeNode {
    pub fn new(judge: Arc<dyn JudgeProvider>, governor: Arc<BudgetGovernor>) -> Self {
        Self { judge, governor }
    }
}

#[async_trait]
impl Node for BoundaryJudgeNode {
    fn name(&self) -> &'static str {
        "boundary_judge"
    }

    async fn run(&self, state: &mut AgentState) -> Result<NodeFlow> {
        if state.bucket != Some(DecisionBucket::Boundary) {
            return Ok(NodeFlow::Continue);
        }

        if state.llm_enabled {
            let tokens = estimate_tokens(&state.goal.descriptor_text())
                + estimate_tokens(&state.item.embed_text());
            let key = format!("judge:boundary:{}:{}", state.goal.id, state.item.id);
            let reserved = self
                .governor
                .reserve(state.goal.user_id, BudgetKind::Judge, tokens, &key)
                .await?;

            if reserved.allowed {
                match self
                    .judge
                    .boundary(&state.goal, &state.item, state.features(), state.score())
                    .await
                {
                    Ok(output) => {
                        state.llm_used = true;
                        state.bucket = Some(if output.promote {
                            DecisionBucket::Immediate
                        } else {
                            DecisionBucket::Batch
                        });
                        state.note(json!({
                            "llm_boundary": {
                                "promote": output.promote,
                                "confidence": output.confidence,
                                "rationale": output.rationale,
                            }
                        }));
                        return Ok(NodeFlow::Continue);
                    }
                    Err(e) => {
                        warn!(error = %e, "boundary judge failed, using rule fallback");
                        state.fallback_reason = Some(format!("judge_error: {e}"));
                    }
                }
            } else {
                state.fallback_reason = Some("judge_budget_exhausted".to_string());
            }
        } else if state.fallback_reason.is_none() {
            state.fallback_reason = Some("judge_disabled".to_string());
        }

        let promote = fallback_promote(state.features());
        state.bucket = Some(if promote {
            DecisionBucket::Immediate
        } else {
            DecisionBucket::Batch
        });
        state.note(json!({
            "boundary_fallback": { "promote": promote }
        }));
        Ok(NodeFlow::Continue)
    }
}

// ---------------------------------------------------------------------------
// Node 4 — PushWorthiness
// ---------------------------------------------------------------------------

/// Separates "relevant and notable" from "relevant but routine". A negative
/// verdict moves the proposal one tier down; with the LLM off the bucket is
/// kept as-is.
pub struct PushWorthinessNode {
    judge: Arc<dyn JudgeProvider>,
    governor: Arc<BudgetGovernor>,
}

impl PushWorthinessNode {
    pub fn new(judge: Arc<dyn JudgeProvider>, governor: Arc<BudgetGovernor>) -> Self {
        Self { judge, governor }
    }
}

#[async_trait]
impl Node for PushWorthinessNode {
    fn name(&self) -> &'static str {
        "push_worthiness"
    }

    async fn run(&self, state: &mut AgentState) -> Result<NodeFlow> {
        let bucket = match state.bucket {
            Some(b) if b != DecisionBucket::Ignore => b,
            _ => return Ok(NodeFlow::Continue),
        };
        if !state.llm_enabled {
            return Ok(NodeFlow::Continue);
        }

        let tokens = estimate_tokens(&state.item.embed_text());
        let key = format!("judge:push:{}:{}", state.goal.id, state.item.id);
        let reserved = self
            .governor
            .reserve(state.goal.user_id, BudgetKind::Judge, tokens, &key)
            .await?;
        if !reserved.allowed {
            state.fallback_reason = Some("judge_budget_exhausted".to_string());
            return Ok(NodeFlow::Continue);
        }

        match self.judge.push_worthiness(&state.goal, &state.item).await {
            Ok(output) => {
                state.llm_used = true;
                state.note(json!({
                    "push_worthiness": { "push": output.push, "reasons": output.reasons }
                }));
                if !output.push {
                    match bucket {
                        DecisionBucket::Immediate => {
                            state.bucket = Some(DecisionBucket::Batch);
                        }
                        // BATCH demotes to the digest tier, not to a drop.
                        DecisionBucket::Batch | DecisionBucket::Boundary => {
                            state.bucket = None;
                            state.drafts.push(super::state::DecisionDraft {
                                decision: PushDecision::Digest,
                            });
                        }
                        DecisionBucket::Ignore => {}
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "push-worthiness judge failed, keeping bucket");
                state.fallback_reason = Some(format!("push_worthiness_error: {e}"));
            }
        }
        Ok(NodeFlow::Continue)
    }
}

// ---------------------------------------------------------------------------
// Node 5 — EmitActions
// ---------------------------------------------------------------------------

/// Persists decision rows (with dedupe keys) and emits proposals for the
/// coalescer. The only node with side effects.
pub struct EmitActionsNode {
    deps: Deps,
}

impl EmitActionsNode {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }

    fn decision_from_bucket(bucket: DecisionBucket) -> PushDecision {
        match bucket {
            DecisionBucket::Immediate => PushDecision::Immediate,
            DecisionBucket::Boundary | DecisionBucket::Batch => PushDecision::Batch,
            DecisionBucket::Ignore => PushDecision::Ignore,
        }
    }

    /// Delivery-channel gates from the goal's push config: a disabled tier
    /// cascades one level down.
    fn apply_channel_gates(decision: PushDecision, config: &GoalPushConfig) -> PushDecision {
        let mut decision = decision;
        if decision == PushDecision::Immediate && !config.immediate_enabled {
            decision = PushDecision::Batch;
        }
        if decision == PushDecision::Batch && !config.batch_enabled {
            decision = PushDecision::Digest;
        }
        if decision == PushDecision::Digest && !config.digest_enabled {
            decision = PushDecision::Ignore;
        }
        decision
    }
}

#[async_trait]
impl Node for EmitActionsNode {
    fn name(&self) -> &'static str {
        "emit_actions"
    }

    async fn run(&self, state: &mut AgentState) -> Result<NodeFlow> {
        // A bucket that survived the chain becomes a draft too.
        if let Some(bucket) = state.bucket.take() {
            state.drafts.push(super::state::DecisionDraft {
                decision: Self::decision_from_bucket(bucket),
            });
        }

        let reason = state.reason_json();
        let drafts = std::mem::take(&mut state.drafts);
        for draft in drafts {
            let decision_kind =
                Self::apply_channel_gates(draft.decision, &state.push_config);

            let mut record =
                PushDecisionRecord::new(state.goal.id, state.item.id, decision_kind);
            record.reason_json = reason.clone();
            let label =
                coalesce_bucket_label(decision_kind, record.decided_at, &state.push_config);
            record.dedupe_key = Some(dedupe_key(
                state.goal.id,
                &state.item.topic_key,
                decision_kind,
                &label,
            ));
            if decision_kind == PushDecision::Ignore {
                record.mark_skipped();
            }

            let inserted = self.deps.decisions.insert_decision_if_new(record.clone()).await?;
            if !inserted {
                debug!(
                    goal = %state.goal.id,
                    item = %state.item.id,
                    decision = %decision_kind,
                    "duplicate dedupe key, proposal dropped"
                );
                continue;
            }
            if decision_kind != PushDecision::Ignore {
                state.proposals.push(ActionProposal {
                    decision_id: record.id,
                    goal_id: state.goal.id,
                    item_id: state.item.id,
                    decision: decision_kind,
                    score: state.match_row.match_score,
                    topic_key: state.item.topic_key.clone(),
                    dedupe_key: record.dedupe_key.clone().unwrap_or_default(),
                    decided_at: record.decided_at,
                });
            }
        }
        Ok(NodeFlow::Continue)
    }
}
