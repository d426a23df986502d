//! In-memory store implementing every repository trait behind one mutex, so
//! multi-row operations observe the same point-in-time state a SQL
//! transaction would.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use sentrycore_common::types::*;
use sentrycore_common::SentryError;

use crate::traits::*;

#[derive(Default)]
struct Inner {
    sources: HashMap<Uuid, Source>,
    source_claims: HashSet<Uuid>,
    subscriptions: HashMap<(Uuid, Uuid), SourceSubscription>,
    items: HashMap<Uuid, Item>,
    items_by_url_hash: HashMap<String, Uuid>,
    goals: HashMap<Uuid, Goal>,
    terms: Vec<GoalPriorityTerm>,
    push_configs: HashMap<Uuid, GoalPushConfig>,
    matches: HashMap<(Uuid, Uuid), GoalItemMatch>,
    decisions: HashMap<Uuid, PushDecisionRecord>,
    decisions_by_key: HashMap<String, Uuid>,
    budgets: HashMap<(Uuid, NaiveDate), BudgetDaily>,
    budget_request_keys: HashMap<String, bool>,
    feedback: Vec<ItemFeedback>,
    blocks: Vec<BlockedSource>,
    ingest_logs: HashMap<Uuid, IngestLog>,
    runs: Vec<AgentRun>,
    outbox: HashMap<Uuid, OutboxEmail>,
    user_emails: HashMap<Uuid, String>,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("store mutex poisoned")
    }
}

#[async_trait]
impl SourceRepo for MemoryStore {
    async fn insert_source(&self, source: Source) -> Result<()> {
        let mut inner = self.lock();
        if inner.sources.values().any(|s| s.name == source.name) {
            return Err(
                SentryError::Validation(format!("source name '{}' already exists", source.name))
                    .into(),
            );
        }
        inner.sources.insert(source.id, source);
        Ok(())
    }

    async fn get_source(&self, id: Uuid) -> Result<Option<Source>> {
        Ok(self.lock().sources.get(&id).cloned())
    }

    async fn update_source(&self, source: Source) -> Result<()> {
        let mut inner = self.lock();
        inner.source_claims.remove(&source.id);
        inner.sources.insert(source.id, source);
        Ok(())
    }

    async fn claim_due_sources(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Source>> {
        let mut inner = self.lock();
        let mut due: Vec<Source> = inner
            .sources
            .values()
            .filter(|s| {
                s.enabled
                    && !s.is_deleted
                    && !inner.source_claims.contains(&s.id)
                    && s.next_fetch_at.map_or(true, |t| t <= now)
            })
            .cloned()
            .collect();
        // NULLS FIRST, then ascending next_fetch_at
        due.sort_by_key(|s| (s.next_fetch_at.is_some(), s.next_fetch_at));
        due.truncate(limit);
        for s in &due {
            inner.source_claims.insert(s.id);
        }
        Ok(due)
    }

    async fn release_claim(&self, id: Uuid) -> Result<()> {
        self.lock().source_claims.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl SubscriptionRepo for MemoryStore {
    async fn upsert_subscription(&self, sub: SourceSubscription) -> Result<()> {
        self.lock()
            .subscriptions
            .insert((sub.user_id, sub.source_id), sub);
        Ok(())
    }

    async fn subscribers_of(&self, source_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .lock()
            .subscriptions
            .values()
            .filter(|s| s.source_id == source_id && s.enabled)
            .map(|s| s.user_id)
            .collect())
    }
}

#[async_trait]
impl ItemRepo for MemoryStore {
    async fn create_item_if_not_exists(&self, item: Item) -> Result<Option<Item>> {
        let mut inner = self.lock();
        if inner.items_by_url_hash.contains_key(&item.url_hash) {
            return Ok(None);
        }
        inner.items_by_url_hash.insert(item.url_hash.clone(), item.id);
        inner.items.insert(item.id, item.clone());
        Ok(Some(item))
    }

    async fn get_item(&self, id: Uuid) -> Result<Option<Item>> {
        Ok(self.lock().items.get(&id).cloned())
    }

    async fn update_item(&self, item: Item) -> Result<()> {
        self.lock().items.insert(item.id, item);
        Ok(())
    }

    async fn pending_embedding(&self, limit: usize) -> Result<Vec<Item>> {
        let mut pending: Vec<Item> = self
            .lock()
            .items
            .values()
            .filter(|i| i.embedding_status == EmbeddingStatus::Pending && !i.is_deleted)
            .cloned()
            .collect();
        pending.sort_by_key(|i| i.ingested_at);
        pending.truncate(limit);
        Ok(pending)
    }
}

#[async_trait]
impl GoalRepo for MemoryStore {
    async fn insert_goal(&self, goal: Goal) -> Result<()> {
        self.lock().goals.insert(goal.id, goal);
        Ok(())
    }

    async fn get_goal(&self, id: Uuid) -> Result<Option<Goal>> {
        Ok(self.lock().goals.get(&id).cloned())
    }

    async fn update_goal(&self, goal: Goal) -> Result<()> {
        self.lock().goals.insert(goal.id, goal);
        Ok(())
    }

    async fn active_goals(&self) -> Result<Vec<Goal>> {
        Ok(self
            .lock()
            .goals
            .values()
            .filter(|g| g.status == GoalStatus::Active && !g.is_deleted)
            .cloned()
            .collect())
    }

    async fn insert_term(&self, term: GoalPriorityTerm) -> Result<()> {
        self.lock().terms.push(term);
        Ok(())
    }

    async fn terms_for(&self, goal_id: Uuid) -> Result<Vec<GoalPriorityTerm>> {
        Ok(self
            .lock()
            .terms
            .iter()
            .filter(|t| t.goal_id == goal_id)
            .cloned()
            .collect())
    }

    async fn upsert_push_config(&self, config: GoalPushConfig) -> Result<()> {
        self.lock().push_configs.insert(config.goal_id, config);
        Ok(())
    }

    async fn push_config(&self, goal_id: Uuid) -> Result<Option<GoalPushConfig>> {
        Ok(self.lock().push_configs.get(&goal_id).cloned())
    }
}

#[async_trait]
impl MatchRepo for MemoryStore {
    async fn upsert_match(&self, m: GoalItemMatch) -> Result<GoalItemMatch> {
        let mut inner = self.lock();
        let key = (m.goal_id, m.item_id);
        let row = match inner.matches.get(&key) {
            Some(existing) => {
                let mut updated = m;
                updated.id = existing.id;
                updated
            }
            None => m,
        };
        inner.matches.insert(key, row.clone());
        Ok(row)
    }

    async fn get_match(&self, goal_id: Uuid, item_id: Uuid) -> Result<Option<GoalItemMatch>> {
        Ok(self.lock().matches.get(&(goal_id, item_id)).cloned())
    }
}

#[async_trait]
impl DecisionRepo for MemoryStore {
    async fn insert_decision_if_new(&self, record: PushDecisionRecord) -> Result<bool> {
        let mut inner = self.lock();
        if let Some(key) = &record.dedupe_key {
            if inner.decisions_by_key.contains_key(key) {
                return Ok(false);
            }
            inner.decisions_by_key.insert(key.clone(), record.id);
        }
        inner.decisions.insert(record.id, record);
        Ok(true)
    }

    async fn get_decision(&self, id: Uuid) -> Result<Option<PushDecisionRecord>> {
        Ok(self.lock().decisions.get(&id).cloned())
    }

    async fn update_decision(&self, record: PushDecisionRecord) -> Result<()> {
        self.lock().decisions.insert(record.id, record);
        Ok(())
    }

    async fn decision_by_dedupe_key(&self, key: &str) -> Result<Option<PushDecisionRecord>> {
        let inner = self.lock();
        Ok(inner
            .decisions_by_key
            .get(key)
            .and_then(|id| inner.decisions.get(id))
            .cloned())
    }

    async fn pending_decisions(
        &self,
        goal_id: Uuid,
        decision: PushDecision,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<PushDecisionRecord>> {
        Ok(self
            .lock()
            .decisions
            .values()
            .filter(|d| {
                d.goal_id == goal_id
                    && d.decision == decision
                    && d.status == PushStatus::Pending
                    && d.decided_at > since
                    && d.decided_at <= until
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl BudgetRepo for MemoryStore {
    async fn try_add_usage(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        embedding_tokens: u64,
        judge_tokens: u64,
        usd: f64,
        limit_usd: f64,
        request_key: &str,
    ) -> Result<bool> {
        let mut inner = self.lock();
        if let Some(prior) = inner.budget_request_keys.get(request_key) {
            return Ok(*prior);
        }
        let row = inner
            .budgets
            .entry((user_id, date))
            .or_insert_with(|| BudgetDaily::new(user_id, date));
        let allowed = row.usd_est + usd < limit_usd;
        if allowed {
            row.embedding_tokens_est += embedding_tokens;
            row.judge_tokens_est += judge_tokens;
            row.usd_est += usd;
            row.updated_at = Utc::now();
        }
        inner
            .budget_request_keys
            .insert(request_key.to_string(), allowed);
        Ok(allowed)
    }

    async fn usage(&self, user_id: Uuid, date: NaiveDate) -> Result<BudgetDaily> {
        Ok(self
            .lock()
            .budgets
            .get(&(user_id, date))
            .cloned()
            .unwrap_or_else(|| BudgetDaily::new(user_id, date)))
    }

    async fn ensure_row(&self, user_id: Uuid, date: NaiveDate) -> Result<()> {
        self.lock()
            .budgets
            .entry((user_id, date))
            .or_insert_with(|| BudgetDaily::new(user_id, date));
        Ok(())
    }
}

#[async_trait]
impl FeedbackRepo for MemoryStore {
    async fn insert_feedback(&self, feedback: ItemFeedback) -> Result<()> {
        self.lock().feedback.push(feedback);
        Ok(())
    }

    async fn dislike_count(&self, user_id: Uuid, source_id: Uuid) -> Result<u32> {
        let inner = self.lock();
        let count = inner
            .feedback
            .iter()
            .filter(|f| f.user_id == user_id && f.feedback == FeedbackType::Dislike)
            .filter(|f| {
                inner
                    .items
                    .get(&f.item_id)
                    .map_or(false, |i| i.source_id == source_id)
            })
            .count();
        Ok(count as u32)
    }

    async fn insert_block(&self, block: BlockedSource) -> Result<()> {
        self.lock().blocks.push(block);
        Ok(())
    }

    async fn is_blocked(&self, user_id: Uuid, goal_id: Uuid, source_id: Uuid) -> Result<bool> {
        Ok(self.lock().blocks.iter().any(|b| {
            b.user_id == user_id
                && b.source_id == source_id
                && b.goal_id.map_or(true, |g| g == goal_id)
        }))
    }
}

#[async_trait]
impl IngestLogRepo for MemoryStore {
    async fn insert_ingest_log(&self, log: IngestLog) -> Result<()> {
        self.lock().ingest_logs.insert(log.id, log);
        Ok(())
    }

    async fn update_ingest_log(&self, log: IngestLog) -> Result<()> {
        self.lock().ingest_logs.insert(log.id, log);
        Ok(())
    }

    async fn ingest_logs_for(&self, source_id: Uuid) -> Result<Vec<IngestLog>> {
        let mut logs: Vec<IngestLog> = self
            .lock()
            .ingest_logs
            .values()
            .filter(|l| l.source_id == source_id)
            .cloned()
            .collect();
        logs.sort_by_key(|l| l.started_at);
        Ok(logs)
    }
}

#[async_trait]
impl RunRepo for MemoryStore {
    async fn insert_run(&self, run: AgentRun) -> Result<()> {
        self.lock().runs.push(run);
        Ok(())
    }
}

#[async_trait]
impl OutboxRepo for MemoryStore {
    async fn insert_outbox(&self, email: OutboxEmail) -> Result<()> {
        self.lock().outbox.insert(email.id, email);
        Ok(())
    }

    async fn update_outbox(&self, email: OutboxEmail) -> Result<()> {
        self.lock().outbox.insert(email.id, email);
        Ok(())
    }

    async fn due_outbox(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxEmail>> {
        let mut due: Vec<OutboxEmail> = self
            .lock()
            .outbox
            .values()
            .filter(|e| e.status == OutboxStatus::Pending && e.next_attempt_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|e| e.next_attempt_at);
        due.truncate(limit);
        Ok(due)
    }
}

#[async_trait]
impl UserRepo for MemoryStore {
    async fn email_of(&self, user_id: Uuid) -> Result<Option<String>> {
        Ok(self.lock().user_emails.get(&user_id).cloned())
    }

    async fn put_user_email(&self, user_id: Uuid, email: String) -> Result<()> {
        self.lock().user_emails.insert(user_id, email);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use sentrycore_common::url_topic::url_hash;

    fn rss_source(name: &str) -> Source {
        Source::new(
            name,
            SourceConfig::Rss {
                feed_url: format!("https://{name}.example.com/feed.xml"),
            },
        )
    }

    fn item_for(source_id: Uuid, url: &str) -> Item {
        Item::new(source_id, url, "title")
    }

    #[tokio::test]
    async fn duplicate_source_name_rejected() {
        let store = MemoryStore::new();
        store.insert_source(rss_source("a")).await.unwrap();
        assert!(store.insert_source(rss_source("a")).await.is_err());
    }

    #[tokio::test]
    async fn same_canonical_url_across_sources_inserts_once() {
        let store = MemoryStore::new();
        let s1 = Uuid::new_v4();
        let s2 = Uuid::new_v4();

        let first = store
            .create_item_if_not_exists(item_for(s1, "https://www.Example.com/A/?utm_source=x&b=2&a=1"))
            .await
            .unwrap();
        assert!(first.is_some());

        let second = store
            .create_item_if_not_exists(item_for(s2, "https://example.com/a?b=2&a=1#frag"))
            .await
            .unwrap();
        assert!(second.is_none(), "canonical duplicate must not insert");

        assert_eq!(
            url_hash("https://www.Example.com/A/?utm_source=x&b=2&a=1"),
            url_hash("https://example.com/a?b=2&a=1#frag"),
        );
    }

    #[tokio::test]
    async fn claim_orders_nulls_first_and_skips_claimed() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let never = rss_source("never-fetched");
        let mut soon = rss_source("due-soon");
        soon.next_fetch_at = Some(now - chrono::Duration::minutes(5));
        let mut later = rss_source("due-later");
        later.next_fetch_at = Some(now - chrono::Duration::minutes(1));
        let mut future = rss_source("not-due");
        future.next_fetch_at = Some(now + chrono::Duration::hours(1));

        let never_id = never.id;
        for s in [never, soon, later, future] {
            store.insert_source(s).await.unwrap();
        }

        let claimed = store.claim_due_sources(now, 10).await.unwrap();
        assert_eq!(claimed.len(), 3);
        assert_eq!(claimed[0].id, never_id, "NULL next_fetch_at sorts first");

        // A second sweep while claims are held picks nothing.
        let again = store.claim_due_sources(now, 10).await.unwrap();
        assert!(again.is_empty());

        // Releasing makes the row eligible again.
        store.release_claim(never_id).await.unwrap();
        let after_release = store.claim_due_sources(now, 10).await.unwrap();
        assert_eq!(after_release.len(), 1);
        assert_eq!(after_release[0].id, never_id);
    }

    #[tokio::test]
    async fn pending_embedding_is_fifo_and_limited() {
        let store = MemoryStore::new();
        let source_id = Uuid::new_v4();
        let base = Utc::now();
        for i in 0..5 {
            let mut item = item_for(source_id, &format!("https://example.com/{i}"));
            item.ingested_at = base + chrono::Duration::seconds(i);
            store.create_item_if_not_exists(item).await.unwrap();
        }
        let batch = store.pending_embedding(3).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert!(batch.windows(2).all(|w| w[0].ingested_at <= w[1].ingested_at));
        assert_eq!(batch[0].url, "https://example.com/0");
    }

    #[tokio::test]
    async fn match_upsert_keeps_row_id() {
        let store = MemoryStore::new();
        let goal_id = Uuid::new_v4();
        let item_id = Uuid::new_v4();
        let m = GoalItemMatch {
            id: Uuid::new_v4(),
            goal_id,
            item_id,
            match_score: 0.5,
            features: MatchFeatures::default(),
            reasons: MatchReasons::default(),
            topic_key: "k".into(),
            item_time: Utc::now(),
            computed_at: Utc::now(),
        };
        let first = store.upsert_match(m.clone()).await.unwrap();
        let mut rescored = m;
        rescored.id = Uuid::new_v4();
        rescored.match_score = 0.9;
        let second = store.upsert_match(rescored).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(
            store.get_match(goal_id, item_id).await.unwrap().unwrap().match_score,
            0.9
        );
    }

    #[tokio::test]
    async fn decision_dedupe_key_is_unique() {
        let store = MemoryStore::new();
        let mut a = PushDecisionRecord::new(Uuid::new_v4(), Uuid::new_v4(), PushDecision::Immediate);
        a.dedupe_key = Some("abc".into());
        let mut b = PushDecisionRecord::new(Uuid::new_v4(), Uuid::new_v4(), PushDecision::Immediate);
        b.dedupe_key = Some("abc".into());

        assert!(store.insert_decision_if_new(a).await.unwrap());
        assert!(!store.insert_decision_if_new(b).await.unwrap());
    }

    #[tokio::test]
    async fn budget_reserve_is_monotone_under_concurrency() {
        let store = Arc::new(MemoryStore::new());
        let user = Uuid::new_v4();
        let date = Utc::now().date_naive();

        // 100 concurrent reservations of 0.02 against a 1.00 cap: at most 50
        // may succeed, and the total must never exceed the cap.
        let mut handles = Vec::new();
        for i in 0..100 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .try_add_usage(user, date, 100, 0, 0.02, 1.0, &format!("req-{i}"))
                    .await
                    .unwrap()
            }));
        }
        let mut allowed = 0;
        for h in handles {
            if h.await.unwrap() {
                allowed += 1;
            }
        }
        let usage = store.usage(user, date).await.unwrap();
        assert!(usage.usd_est <= 1.0 + 1e-9, "usd total {} over cap", usage.usd_est);
        assert!(allowed <= 50);
    }

    #[tokio::test]
    async fn budget_request_key_is_idempotent() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let date = Utc::now().date_naive();

        assert!(store
            .try_add_usage(user, date, 100, 0, 0.10, 1.0, "req-1")
            .await
            .unwrap());
        // Retry with the same key: no double count.
        assert!(store
            .try_add_usage(user, date, 100, 0, 0.10, 1.0, "req-1")
            .await
            .unwrap());
        let usage = store.usage(user, date).await.unwrap();
        assert!((usage.usd_est - 0.10).abs() < 1e-9);
        assert_eq!(usage.embedding_tokens_est, 100);
    }

    #[tokio::test]
    async fn block_scopes_to_goal_or_global() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let source = Uuid::new_v4();
        let goal_a = Uuid::new_v4();
        let goal_b = Uuid::new_v4();

        store
            .insert_block(BlockedSource {
                id: Uuid::new_v4(),
                user_id: user,
                goal_id: Some(goal_a),
                source_id: source,
                blocked_at: Utc::now(),
            })
            .await
            .unwrap();

        assert!(store.is_blocked(user, goal_a, source).await.unwrap());
        assert!(!store.is_blocked(user, goal_b, source).await.unwrap());

        store
            .insert_block(BlockedSource {
                id: Uuid::new_v4(),
                user_id: user,
                goal_id: None,
                source_id: source,
                blocked_at: Utc::now(),
            })
            .await
            .unwrap();
        assert!(store.is_blocked(user, goal_b, source).await.unwrap());
    }
}
