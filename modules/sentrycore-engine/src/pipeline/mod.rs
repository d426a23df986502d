//! Decision pipeline (C7): a linear node chain over a shared state record.
//!
//! The chain is an ordered sequence with an early-exit sentinel, not a DAG.
//! EmitActions always runs — a halted run still persists its IGNORE decision
//! for auditability. Every run leaves an AgentRun row behind.

pub mod nodes;
pub mod state;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use tracing::error;
use uuid::Uuid;

use sentrycore_common::events::{ActionProposal, DecisionTrigger, MatchComputed};
use sentrycore_common::types::*;
use sentrycore_common::{SentryError, Thresholds};
use sentrycore_store::{GoalRepo, ItemRepo, MatchRepo, RunRepo};

use crate::budget::BudgetGovernor;
use crate::deps::Deps;
use crate::judge::JudgeProvider;
use nodes::{
    BoundaryJudgeNode, BucketNode, EmitActionsNode, Node, NodeFlow, PushWorthinessNode, RuleGate,
};
pub use state::{AgentState, BlockReason, DecisionBucket};

pub struct NodePipeline {
    nodes: Vec<Box<dyn Node>>,
    emit: EmitActionsNode,
}

impl NodePipeline {
    /// Run the chain. Halting skips the remaining decision nodes but still
    /// reaches EmitActions so vetoed runs persist their IGNORE rows.
    pub async fn run(&self, state: &mut AgentState) -> Result<()> {
        for node in &self.nodes {
            match node.run(state).await {
                Ok(NodeFlow::Continue) => {}
                Ok(NodeFlow::Halt) => break,
                Err(e) => return Err(e.context(format!("node {} failed", node.name()))),
            }
        }
        self.emit
            .run(state)
            .await
            .map_err(|e| e.context("node emit_actions failed"))?;
        Ok(())
    }
}

/// Assemble the standard chain with the configured judge and governor.
pub fn build_pipeline(
    deps: Deps,
    judge: Arc<dyn JudgeProvider>,
    governor: Arc<BudgetGovernor>,
) -> NodePipeline {
    NodePipeline {
        nodes: vec![
            Box::new(RuleGate::new(deps.clone())),
            Box::new(BucketNode),
            Box::new(BoundaryJudgeNode::new(judge.clone(), governor.clone())),
            Box::new(PushWorthinessNode::new(judge, governor)),
        ],
        emit: EmitActionsNode::new(deps),
    }
}

/// Front door for C7: loads the run context, executes the chain, records the
/// AgentRun row, and hands the surviving proposals back to the caller.
pub struct DecisionEngine {
    deps: Deps,
    pipeline: NodePipeline,
    governor: Arc<BudgetGovernor>,
    thresholds: Thresholds,
    judge_enabled: bool,
    model_name: String,
}

impl DecisionEngine {
    pub fn new(
        deps: Deps,
        judge: Arc<dyn JudgeProvider>,
        governor: Arc<BudgetGovernor>,
        thresholds: Thresholds,
        judge_enabled: bool,
    ) -> Self {
        let model_name = judge.model_name().to_string();
        let pipeline = build_pipeline(deps.clone(), judge, governor.clone());
        Self {
            deps,
            pipeline,
            governor,
            thresholds,
            judge_enabled,
            model_name,
        }
    }

    /// Process one MatchComputed event end-to-end. An error aborts this run
    /// only; the caller moves on to other matches.
    pub async fn on_match_computed(&self, event: MatchComputed) -> Result<Vec<ActionProposal>> {
        let started = Instant::now();
        let trigger = DecisionTrigger::MatchComputed(event.clone());

        let outcome = self.run_inner(&event, trigger.clone()).await;
        let (status, llm_used, error_message) = match &outcome {
            Ok((llm_used, _)) => (AgentRunStatus::Completed, *llm_used, None),
            Err(e) => {
                error!(goal = %event.goal_id, item = %event.item_id, error = %e, "pipeline run failed");
                (AgentRunStatus::Error, false, Some(e.to_string()))
            }
        };

        self.deps
            .runs
            .insert_run(AgentRun {
                id: Uuid::new_v4(),
                trigger: trigger.as_str().to_string(),
                goal_id: Some(event.goal_id),
                status,
                llm_used,
                model_name: Some(self.model_name.clone()),
                latency_ms: Some(started.elapsed().as_millis() as u64),
                error_message,
                created_at: Utc::now(),
            })
            .await?;

        // A failed run is recorded and swallowed so the match engine keeps
        // processing other items.
        Ok(outcome.map(|(_, proposals)| proposals).unwrap_or_default())
    }

    async fn run_inner(
        &self,
        event: &MatchComputed,
        trigger: DecisionTrigger,
    ) -> Result<(bool, Vec<ActionProposal>)> {
        let goal = self
            .deps
            .goals
            .get_goal(event.goal_id)
            .await?
            .ok_or_else(|| SentryError::Validation(format!("goal {} missing", event.goal_id)))?;
        let item = self
            .deps
            .items
            .get_item(event.item_id)
            .await?
            .ok_or_else(|| SentryError::Validation(format!("item {} missing", event.item_id)))?;
        let match_row = self
            .deps
            .matches
            .get_match(event.goal_id, event.item_id)
            .await?
            .ok_or_else(|| {
                SentryError::Validation(format!(
                    "match ({}, {}) missing",
                    event.goal_id, event.item_id
                ))
            })?;
        let push_config = self
            .deps
            .goals
            .push_config(goal.id)
            .await?
            .unwrap_or_else(|| GoalPushConfig::new(goal.id));
        let budget_flags = self.governor.flags(goal.user_id).await?;
        let source_name = match_row.reasons.source_name.clone();

        let mut state = AgentState {
            trigger,
            goal,
            push_config,
            item,
            source_name,
            match_row,
            budget_flags,
            thresholds: self.thresholds,
            llm_enabled: self.judge_enabled,
            llm_used: false,
            fallback_reason: None,
            block_reasons: Vec::new(),
            bucket: None,
            evidence: Vec::new(),
            drafts: Vec::new(),
            proposals: Vec::new(),
        };

        self.pipeline.run(&mut state).await?;
        Ok((state.llm_used, state.proposals))
    }
}
