//! Delivery coalescer: the 5-minute immediate buffer, per-goal batch
//! windows, and the daily digest, all ending in the outbox.
//!
//! At-most-once delivery per (goal, topic, decision, coalesce bucket) comes
//! from two layers: the unique index on `dedupe_key` stops duplicate
//! decision rows at emit time, and every send re-checks that the decision
//! row is still PENDING before writing the outbox row.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use sentrycore_common::events::ActionProposal;
use sentrycore_common::types::*;
use sentrycore_store::{DecisionRepo, GoalRepo, ItemRepo, KvStore, OutboxRepo, SourceRepo, UserRepo};

use crate::deps::Deps;
use crate::render::{EmailItem, EmailRenderer, RenderedEmail};

/// Immediate buffers expire after 10 minutes if never flushed.
pub const IMMEDIATE_BUFFER_TTL_SECS: u64 = 600;

/// At most this many items per goal per immediate email; the rest demote.
pub const IMMEDIATE_ITEM_CAP: usize = 3;

const IMMEDIATE_BUFFER_PREFIX: &str = "buffer:immediate:";

/// 5-minute UTC bucket label, e.g. `2025-01-06T10:05`.
pub fn immediate_bucket_label(t: DateTime<Utc>) -> String {
    let secs = t.timestamp();
    let bucket_start = secs - secs.rem_euclid(300);
    DateTime::<Utc>::from_timestamp(bucket_start, 0)
        .unwrap_or(t)
        .format("%Y-%m-%dT%H:%M")
        .to_string()
}

pub fn immediate_buffer_key(goal_id: Uuid, bucket_label: &str) -> String {
    format!("{IMMEDIATE_BUFFER_PREFIX}{goal_id}:{bucket_label}")
}

/// The first configured window strictly after `after` (UTC wall clock),
/// rolling to the next day when today's windows have passed.
pub fn next_batch_window(after: DateTime<Utc>, windows: &[NaiveTime]) -> Option<DateTime<Utc>> {
    if windows.is_empty() {
        return None;
    }
    let mut sorted = windows.to_vec();
    sorted.sort();
    for w in &sorted {
        let candidate = after.date_naive().and_time(*w).and_utc();
        if candidate > after {
            return Some(candidate);
        }
    }
    let tomorrow = after.date_naive() + Duration::days(1);
    Some(tomorrow.and_time(sorted[0]).and_utc())
}

/// The window immediately before `window` in the schedule (the previous
/// window the same day, or the last window the day before).
pub fn previous_batch_window(window: DateTime<Utc>, windows: &[NaiveTime]) -> DateTime<Utc> {
    let mut sorted = windows.to_vec();
    sorted.sort();
    let time = window.time();
    let earlier: Vec<&NaiveTime> = sorted.iter().filter(|w| **w < time).collect();
    match earlier.last() {
        Some(w) => window.date_naive().and_time(**w).and_utc(),
        None => {
            let yesterday = window.date_naive() - Duration::days(1);
            let last = sorted.last().copied().unwrap_or(time);
            yesterday.and_time(last).and_utc()
        }
    }
}

/// The next digest send strictly after `after`.
pub fn next_digest_at(after: DateTime<Utc>, digest_time: NaiveTime) -> DateTime<Utc> {
    let today = after.date_naive().and_time(digest_time).and_utc();
    if today > after {
        today
    } else {
        (after.date_naive() + Duration::days(1))
            .and_time(digest_time)
            .and_utc()
    }
}

/// The coalesce-bucket component of the dedupe key for a decision.
pub fn coalesce_bucket_label(
    decision: PushDecision,
    decided_at: DateTime<Utc>,
    push_config: &GoalPushConfig,
) -> String {
    match decision {
        PushDecision::Immediate => immediate_bucket_label(decided_at),
        PushDecision::Batch => next_batch_window(decided_at, &push_config.parsed_batch_windows())
            .map(|w| w.format("%Y-%m-%dT%H:%M").to_string())
            .unwrap_or_else(|| "unscheduled".to_string()),
        PushDecision::Digest => push_config
            .parsed_digest_time()
            .map(|t| next_digest_at(decided_at, t).format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "unscheduled".to_string()),
        PushDecision::Ignore => "none".to_string(),
    }
}

/// sha256(goal_id|topic_key|decision|coalesce_bucket), lowercase hex.
pub fn dedupe_key(
    goal_id: Uuid,
    topic_key: &str,
    decision: PushDecision,
    bucket_label: &str,
) -> String {
    let input = format!("{goal_id}|{topic_key}|{decision}|{bucket_label}");
    hex::encode(Sha256::digest(input.as_bytes()))
}

pub struct Coalescer {
    deps: Deps,
    renderer: EmailRenderer,
    digest_top_n: usize,
}

impl Coalescer {
    pub fn new(deps: Deps, renderer: EmailRenderer, digest_top_n: usize) -> Self {
        Self {
            deps,
            renderer,
            digest_top_n,
        }
    }

    /// Route a freshly emitted proposal. IMMEDIATE goes into the 5-minute
    /// buffer; BATCH and DIGEST wait in the store as PENDING rows until
    /// their window fires.
    pub async fn accept(&self, proposal: &ActionProposal) -> Result<()> {
        if proposal.decision != PushDecision::Immediate {
            return Ok(());
        }
        let key = immediate_buffer_key(
            proposal.goal_id,
            &immediate_bucket_label(proposal.decided_at),
        );
        self.deps
            .kv
            .push(&key, serde_json::to_value(proposal)?, IMMEDIATE_BUFFER_TTL_SECS)
            .await
    }

    /// Seal and drain every immediate buffer from a past 5-minute bucket.
    /// Up to three most-recent items per goal go out in one email; the rest
    /// are demoted to BATCH. Returns the number of emails queued.
    pub async fn flush_immediate(&self, now: DateTime<Utc>) -> Result<usize> {
        let current = immediate_bucket_label(now);
        let keys = self.deps.kv.keys_with_prefix(IMMEDIATE_BUFFER_PREFIX).await?;

        let mut sent = 0usize;
        for key in keys {
            let remainder = &key[IMMEDIATE_BUFFER_PREFIX.len()..];
            let (goal_part, label) = match remainder.split_once(':') {
                Some(parts) => parts,
                None => continue,
            };
            if label == current {
                continue; // bucket still open
            }
            let goal_id: Uuid = match goal_part.parse() {
                Ok(id) => id,
                Err(_) => continue,
            };

            let mut proposals: Vec<ActionProposal> = self
                .deps
                .kv
                .take(&key)
                .await?
                .into_iter()
                .filter_map(|v| serde_json::from_value(v).ok())
                .collect();
            if proposals.is_empty() {
                continue;
            }
            proposals.sort_by(|a, b| b.decided_at.cmp(&a.decided_at));

            // At-most-once: only rows still PENDING are deliverable.
            let mut deliverable = Vec::new();
            for proposal in proposals {
                match self.deps.decisions.get_decision(proposal.decision_id).await? {
                    Some(d) if d.status == PushStatus::Pending => deliverable.push(d),
                    _ => {}
                }
            }
            if deliverable.is_empty() {
                continue;
            }

            let overflow = deliverable.split_off(deliverable.len().min(IMMEDIATE_ITEM_CAP));
            for decision in overflow {
                self.demote_to_batch(decision).await?;
            }

            let goal = self.require_goal(goal_id).await?;
            let mut items = Vec::new();
            for decision in &deliverable {
                if let Some(item) = self.email_item(decision).await? {
                    items.push(item);
                }
            }
            if items.is_empty() {
                continue;
            }
            let rendered = self.renderer.render_immediate(&goal, &items);
            if self.queue_email(&goal, rendered, deliverable).await? {
                sent += 1;
            }
        }
        Ok(sent)
    }

    /// Fire every batch window that elapsed in (since, now].
    pub async fn run_batch_windows(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> Result<usize> {
        let mut sent = 0usize;
        for goal in self.deps.goals.active_goals().await? {
            let config = match self.deps.goals.push_config(goal.id).await? {
                Some(c) if c.batch_enabled => c,
                _ => continue,
            };
            let windows = config.parsed_batch_windows();

            let mut cursor = since;
            while let Some(window) = next_batch_window(cursor, &windows) {
                if window > now {
                    break;
                }
                cursor = window;

                let previous = previous_batch_window(window, &windows);
                let mut pending = self
                    .deps
                    .decisions
                    .pending_decisions(goal.id, PushDecision::Batch, previous, window)
                    .await?;
                if pending.is_empty() {
                    continue; // empty window sends nothing
                }
                pending.sort_by(|a, b| {
                    decision_score(b)
                        .partial_cmp(&decision_score(a))
                        .unwrap_or(std::cmp::Ordering::Equal)
                });

                let mut items = Vec::new();
                for decision in &pending {
                    if let Some(item) = self.email_item(decision).await? {
                        items.push(item);
                    }
                }
                if items.is_empty() {
                    continue;
                }
                let rendered = self.renderer.render_batch(&goal, &items);
                if self.queue_email(&goal, rendered, pending).await? {
                    sent += 1;
                }
            }
        }
        Ok(sent)
    }

    /// Fire every digest send that elapsed in (since, now]: the last 24 h of
    /// DIGEST decisions, top-N by score then recency.
    pub async fn run_digest(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> Result<usize> {
        let mut sent = 0usize;
        for goal in self.deps.goals.active_goals().await? {
            let config = match self.deps.goals.push_config(goal.id).await? {
                Some(c) if c.digest_enabled => c,
                _ => continue,
            };
            let digest_time = match config.parsed_digest_time() {
                Some(t) => t,
                None => continue,
            };

            let fire_at = next_digest_at(since, digest_time);
            if fire_at > now {
                continue;
            }

            let mut pending = self
                .deps
                .decisions
                .pending_decisions(
                    goal.id,
                    PushDecision::Digest,
                    fire_at - Duration::hours(24),
                    fire_at,
                )
                .await?;

            // BATCH rows whose window fired over an hour ago and never
            // drained (coalescer outage, window removed) ride along in the
            // digest instead of going stale.
            let windows = config.parsed_batch_windows();
            let missed_batch = self
                .deps
                .decisions
                .pending_decisions(
                    goal.id,
                    PushDecision::Batch,
                    fire_at - Duration::hours(24),
                    fire_at,
                )
                .await?
                .into_iter()
                .filter(|d| {
                    next_batch_window(d.decided_at, &windows)
                        .map_or(true, |w| w + Duration::hours(1) < fire_at)
                });
            pending.extend(missed_batch);

            if pending.is_empty() {
                continue;
            }

            // Rank by score desc, then item_time desc, and keep the top N.
            let mut ranked = Vec::new();
            for decision in pending.drain(..) {
                let item_time = match self.deps.items.get_item(decision.item_id).await? {
                    Some(item) => item.item_time(),
                    None => decision.decided_at,
                };
                ranked.push((decision, item_time));
            }
            ranked.sort_by(|a, b| {
                decision_score(&b.0)
                    .partial_cmp(&decision_score(&a.0))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(b.1.cmp(&a.1))
            });
            let kept: Vec<PushDecisionRecord> = ranked
                .into_iter()
                .take(self.digest_top_n)
                .map(|(d, _)| d)
                .collect();

            let mut items = Vec::new();
            for decision in &kept {
                if let Some(item) = self.email_item(decision).await? {
                    items.push(item);
                }
            }
            if items.is_empty() {
                continue;
            }
            let rendered = self.renderer.render_digest(&goal, &items);
            if self.queue_email(&goal, rendered, kept).await? {
                sent += 1;
            }
        }
        Ok(sent)
    }

    /// Immediate overflow: retire the old row and queue the item for the
    /// next batch window under a fresh dedupe key.
    async fn demote_to_batch(&self, mut decision: PushDecisionRecord) -> Result<()> {
        let config = self
            .deps
            .goals
            .push_config(decision.goal_id)
            .await?
            .unwrap_or_else(|| GoalPushConfig::new(decision.goal_id));
        let topic_key = match self.deps.items.get_item(decision.item_id).await? {
            Some(item) => item.topic_key,
            None => return Ok(()),
        };

        decision.mark_skipped();
        let reason = decision.reason_json.clone();
        let (goal_id, item_id) = (decision.goal_id, decision.item_id);
        self.deps.decisions.update_decision(decision).await?;

        let mut demoted = PushDecisionRecord::new(goal_id, item_id, PushDecision::Batch);
        demoted.reason_json = reason;
        let label = coalesce_bucket_label(PushDecision::Batch, demoted.decided_at, &config);
        demoted.dedupe_key = Some(dedupe_key(goal_id, &topic_key, PushDecision::Batch, &label));
        let inserted = self.deps.decisions.insert_decision_if_new(demoted).await?;
        info!(%goal_id, %item_id, inserted, "immediate overflow demoted to batch");
        Ok(())
    }

    async fn require_goal(&self, goal_id: Uuid) -> Result<Goal> {
        self.deps
            .goals
            .get_goal(goal_id)
            .await?
            .ok_or_else(|| anyhow!("goal {goal_id} not found"))
    }

    async fn email_item(&self, decision: &PushDecisionRecord) -> Result<Option<EmailItem>> {
        let item = match self.deps.items.get_item(decision.item_id).await? {
            Some(item) => item,
            None => return Ok(None),
        };
        let source_name = self
            .deps
            .sources
            .get_source(item.source_id)
            .await?
            .map(|s| s.name)
            .unwrap_or_default();
        Ok(Some(EmailItem {
            item_id: item.id,
            goal_id: decision.goal_id,
            title: item.title,
            url: item.url,
            snippet: item.snippet,
            source_name,
            score: decision_score(decision),
        }))
    }

    /// Write the outbox row and flip the covered decisions to SENT together.
    /// Returns false (marking the decisions SKIPPED) when the goal's user
    /// has no deliverable address.
    async fn queue_email(
        &self,
        goal: &Goal,
        rendered: RenderedEmail,
        decisions: Vec<PushDecisionRecord>,
    ) -> Result<bool> {
        let to = match self.deps.users.email_of(goal.user_id).await? {
            Some(email) => email,
            None => {
                warn!(goal = %goal.name, "no email address for goal owner, skipping send");
                for mut decision in decisions {
                    decision.mark_skipped();
                    self.deps.decisions.update_decision(decision).await?;
                }
                return Ok(false);
            }
        };

        let decision_ids: Vec<Uuid> = decisions.iter().map(|d| d.id).collect();
        let outbox = OutboxEmail::new(
            decision_ids,
            to,
            rendered.subject,
            rendered.html_body,
            rendered.text_body,
        );
        self.deps.outbox.insert_outbox(outbox).await?;
        for mut decision in decisions {
            decision.mark_sent();
            self.deps.decisions.update_decision(decision).await?;
        }
        Ok(true)
    }
}

fn decision_score(decision: &PushDecisionRecord) -> f64 {
    decision
        .reason_json
        .get("score")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0)
}
