use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use sentrycore_common::types::*;

#[async_trait]
pub trait SourceRepo: Send + Sync {
    /// Insert a source. Fails if the name is already taken.
    async fn insert_source(&self, source: Source) -> Result<()>;

    async fn get_source(&self, id: Uuid) -> Result<Option<Source>>;

    async fn update_source(&self, source: Source) -> Result<()>;

    /// Select up to `limit` enabled sources due for fetching
    /// (`next_fetch_at` null or <= now), ordered `next_fetch_at ASC NULLS
    /// FIRST`. The selection claims the rows for this sweep, so concurrent
    /// sweeps never pick the same source (SKIP LOCKED equivalent).
    async fn claim_due_sources(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Source>>;

    /// Release a claim without touching scheduling fields (dispatch error:
    /// the row stays eligible next tick).
    async fn release_claim(&self, id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait SubscriptionRepo: Send + Sync {
    /// Upsert on (user_id, source_id).
    async fn upsert_subscription(&self, sub: SourceSubscription) -> Result<()>;

    /// Users with an enabled subscription to the source.
    async fn subscribers_of(&self, source_id: Uuid) -> Result<Vec<Uuid>>;
}

#[async_trait]
pub trait ItemRepo: Send + Sync {
    /// Conditional insert keyed on `url_hash`. Returns None when an item
    /// with the same canonical URL already exists (counted as a duplicate).
    async fn create_item_if_not_exists(&self, item: Item) -> Result<Option<Item>>;

    async fn get_item(&self, id: Uuid) -> Result<Option<Item>>;

    async fn update_item(&self, item: Item) -> Result<()>;

    /// Items with `embedding_status = pending`, FIFO by `ingested_at`.
    async fn pending_embedding(&self, limit: usize) -> Result<Vec<Item>>;
}

#[async_trait]
pub trait GoalRepo: Send + Sync {
    async fn insert_goal(&self, goal: Goal) -> Result<()>;

    async fn get_goal(&self, id: Uuid) -> Result<Option<Goal>>;

    async fn update_goal(&self, goal: Goal) -> Result<()>;

    /// All ACTIVE goals.
    async fn active_goals(&self) -> Result<Vec<Goal>>;

    async fn insert_term(&self, term: GoalPriorityTerm) -> Result<()>;

    async fn terms_for(&self, goal_id: Uuid) -> Result<Vec<GoalPriorityTerm>>;

    /// Upsert on goal_id.
    async fn upsert_push_config(&self, config: GoalPushConfig) -> Result<()>;

    async fn push_config(&self, goal_id: Uuid) -> Result<Option<GoalPushConfig>>;
}

#[async_trait]
pub trait MatchRepo: Send + Sync {
    /// Upsert on (goal_id, item_id): a recompute overwrites score, features
    /// and reasons but keeps the original row id.
    async fn upsert_match(&self, m: GoalItemMatch) -> Result<GoalItemMatch>;

    async fn get_match(&self, goal_id: Uuid, item_id: Uuid) -> Result<Option<GoalItemMatch>>;
}

#[async_trait]
pub trait DecisionRepo: Send + Sync {
    /// Insert honoring the unique index on `dedupe_key`. Returns false (and
    /// inserts nothing) when a record with the same key already exists.
    async fn insert_decision_if_new(&self, record: PushDecisionRecord) -> Result<bool>;

    async fn get_decision(&self, id: Uuid) -> Result<Option<PushDecisionRecord>>;

    async fn update_decision(&self, record: PushDecisionRecord) -> Result<()>;

    async fn decision_by_dedupe_key(&self, key: &str) -> Result<Option<PushDecisionRecord>>;

    /// PENDING records for a goal with the given decision, `decided_at`
    /// within (since, until].
    async fn pending_decisions(
        &self,
        goal_id: Uuid,
        decision: PushDecision,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<PushDecisionRecord>>;
}

#[async_trait]
pub trait BudgetRepo: Send + Sync {
    /// Atomically add usage to the (user, date) row, creating it if absent,
    /// unless the projected USD total would reach `limit_usd`. Returns
    /// whether the reservation was applied. `request_key` makes retries
    /// idempotent: a key seen before is a no-op reporting its prior outcome.
    async fn try_add_usage(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        embedding_tokens: u64,
        judge_tokens: u64,
        usd: f64,
        limit_usd: f64,
        request_key: &str,
    ) -> Result<bool>;

    async fn usage(&self, user_id: Uuid, date: NaiveDate) -> Result<BudgetDaily>;

    /// Idempotent snapshot insert for the rollover job.
    async fn ensure_row(&self, user_id: Uuid, date: NaiveDate) -> Result<()>;
}

#[async_trait]
pub trait FeedbackRepo: Send + Sync {
    async fn insert_feedback(&self, feedback: ItemFeedback) -> Result<()>;

    async fn dislike_count(&self, user_id: Uuid, source_id: Uuid) -> Result<u32>;

    async fn insert_block(&self, block: BlockedSource) -> Result<()>;

    /// True when a block row matches (user, source) globally or for the goal.
    async fn is_blocked(&self, user_id: Uuid, goal_id: Uuid, source_id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait IngestLogRepo: Send + Sync {
    async fn insert_ingest_log(&self, log: IngestLog) -> Result<()>;

    async fn update_ingest_log(&self, log: IngestLog) -> Result<()>;

    async fn ingest_logs_for(&self, source_id: Uuid) -> Result<Vec<IngestLog>>;
}

#[async_trait]
pub trait RunRepo: Send + Sync {
    async fn insert_run(&self, run: AgentRun) -> Result<()>;
}

#[async_trait]
pub trait OutboxRepo: Send + Sync {
    async fn insert_outbox(&self, email: OutboxEmail) -> Result<()>;

    async fn update_outbox(&self, email: OutboxEmail) -> Result<()>;

    /// PENDING rows whose `next_attempt_at <= now`.
    async fn due_outbox(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxEmail>>;
}

/// Email address lookup for a user. The full user aggregate is owned by the
/// out-of-scope auth subsystem; only the address reaches the delivery path.
#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn email_of(&self, user_id: Uuid) -> Result<Option<String>>;

    async fn put_user_email(&self, user_id: Uuid, email: String) -> Result<()>;
}
