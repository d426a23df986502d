//! Budget governor: per-user, per-day token and USD accounting with soft and
//! hard cutoffs.
//!
//! Soft cutoff (spend ≥ cap × soft_factor) turns the judge LLM off — the
//! pipeline falls back to deterministic rules. Hard cutoff (spend ≥ cap)
//! additionally stops embedding, so new items land as `skipped_budget`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use sentrycore_common::types::BudgetFlags;
use sentrycore_store::BudgetRepo;

/// Shared bucket for items from sources with no private owner.
pub const SYSTEM_USER: Uuid = Uuid::nil();

/// How long cached cutoff flags stay valid.
const FLAGS_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetKind {
    Embedding,
    Judge,
}

/// Result of a reservation attempt.
#[derive(Debug, Clone, Copy)]
pub struct Reservation {
    pub allowed: bool,
    /// The user is past the soft threshold; callers on high-priority paths
    /// may proceed anyway, everything else should downgrade.
    pub soft_exceeded: bool,
}

pub struct BudgetGovernor {
    budgets: Arc<dyn BudgetRepo>,
    daily_cap_usd: f64,
    soft_factor: f64,
    usd_per_mtok_embedding: f64,
    usd_per_mtok_judge: f64,
    cap_overrides: HashMap<Uuid, f64>,
    flags_cache: Mutex<HashMap<Uuid, (BudgetFlags, Instant)>>,
}

impl BudgetGovernor {
    pub fn new(
        budgets: Arc<dyn BudgetRepo>,
        daily_cap_usd: f64,
        soft_factor: f64,
        usd_per_mtok_embedding: f64,
        usd_per_mtok_judge: f64,
    ) -> Self {
        Self {
            budgets,
            daily_cap_usd,
            soft_factor,
            usd_per_mtok_embedding,
            usd_per_mtok_judge,
            cap_overrides: HashMap::new(),
            flags_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Per-user daily cap override.
    pub fn with_cap_override(mut self, user_id: Uuid, cap_usd: f64) -> Self {
        self.cap_overrides.insert(user_id, cap_usd);
        self
    }

    fn cap_for(&self, user_id: Uuid) -> f64 {
        self.cap_overrides
            .get(&user_id)
            .copied()
            .unwrap_or(self.daily_cap_usd)
    }

    fn usd_for(&self, kind: BudgetKind, tokens: u64) -> f64 {
        let rate = match kind {
            BudgetKind::Embedding => self.usd_per_mtok_embedding,
            BudgetKind::Judge => self.usd_per_mtok_judge,
        };
        tokens as f64 / 1_000_000.0 * rate
    }

    /// Atomically reserve `tokens_est` of the given kind for the user today.
    /// Judge reservations are limited at the soft threshold, embedding at the
    /// hard cap. `request_key` makes retried reservations idempotent.
    pub async fn reserve(
        &self,
        user_id: Uuid,
        kind: BudgetKind,
        tokens_est: u64,
        request_key: &str,
    ) -> Result<Reservation> {
        let date = Utc::now().date_naive();
        let cap = self.cap_for(user_id);
        let limit = match kind {
            BudgetKind::Embedding => cap,
            BudgetKind::Judge => cap * self.soft_factor,
        };
        let usd = self.usd_for(kind, tokens_est);
        let (embedding_tokens, judge_tokens) = match kind {
            BudgetKind::Embedding => (tokens_est, 0),
            BudgetKind::Judge => (0, tokens_est),
        };

        let allowed = self
            .budgets
            .try_add_usage(
                user_id,
                date,
                embedding_tokens,
                judge_tokens,
                usd,
                limit,
                request_key,
            )
            .await?;

        let usage = self.budgets.usage(user_id, date).await?;
        let soft_exceeded = usage.usd_est >= cap * self.soft_factor;
        if !allowed {
            warn!(%user_id, ?kind, usd_est = usage.usd_est, cap, "budget reservation refused");
        }

        // Spend moved; cached flags may be stale.
        self.flags_cache.lock().await.remove(&user_id);

        Ok(Reservation {
            allowed,
            soft_exceeded,
        })
    }

    /// Cutoff flags for the user, cached for up to 10 seconds.
    pub async fn flags(&self, user_id: Uuid) -> Result<BudgetFlags> {
        let mut cache = self.flags_cache.lock().await;
        if let Some((flags, at)) = cache.get(&user_id) {
            if at.elapsed() < FLAGS_TTL {
                return Ok(*flags);
            }
        }

        let cap = self.cap_for(user_id);
        let usage = self.budgets.usage(user_id, Utc::now().date_naive()).await?;
        let flags = BudgetFlags {
            embedding_disabled: usage.usd_est >= cap,
            judge_disabled: usage.usd_est >= cap * self.soft_factor,
        };
        cache.insert(user_id, (flags, Instant::now()));
        Ok(flags)
    }

    /// Idempotent daily rollover: make sure today's row exists for each user.
    pub async fn rollover(&self, user_ids: &[Uuid], date: NaiveDate) -> Result<()> {
        for user_id in user_ids {
            self.budgets.ensure_row(*user_id, date).await?;
        }
        Ok(())
    }
}

/// Token estimate for provider calls: 4 characters per token, rounded up.
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentrycore_store::MemoryStore;

    fn governor(cap: f64) -> (BudgetGovernor, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        // 1 USD per 1k tokens makes spend arithmetic easy to read: a
        // 100-token reservation costs 0.1 USD.
        let gov = BudgetGovernor::new(store.clone(), cap, 0.8, 1000.0, 1000.0);
        (gov, store)
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[tokio::test]
    async fn embedding_allowed_until_hard_cap() {
        let (gov, _) = governor(1.0);
        let user = Uuid::new_v4();

        // 0.9 USD of embedding: allowed (projected 0.9 < 1.0).
        let r = gov
            .reserve(user, BudgetKind::Embedding, 900, "e1")
            .await
            .unwrap();
        assert!(r.allowed);
        assert!(r.soft_exceeded, "0.9 >= 0.8 soft threshold");

        // Another 0.2 USD: projected 1.1 >= 1.0 → refused.
        let r = gov
            .reserve(user, BudgetKind::Embedding, 200, "e2")
            .await
            .unwrap();
        assert!(!r.allowed);
    }

    #[tokio::test]
    async fn judge_cut_off_at_soft_threshold() {
        let (gov, _) = governor(1.0);
        let user = Uuid::new_v4();

        // 0.7 USD of judge spend: allowed (0.7 < 0.8).
        let r = gov.reserve(user, BudgetKind::Judge, 700, "j1").await.unwrap();
        assert!(r.allowed);

        // 0.2 more: projected 0.9 >= 0.8 → refused even though hard cap has room.
        let r = gov.reserve(user, BudgetKind::Judge, 200, "j2").await.unwrap();
        assert!(!r.allowed);

        // Embedding still fits under the hard cap.
        let r = gov
            .reserve(user, BudgetKind::Embedding, 200, "e1")
            .await
            .unwrap();
        assert!(r.allowed);
    }

    #[tokio::test]
    async fn flags_follow_spend() {
        let (gov, _) = governor(1.0);
        let user = Uuid::new_v4();

        let flags = gov.flags(user).await.unwrap();
        assert!(!flags.embedding_disabled);
        assert!(!flags.judge_disabled);

        gov.reserve(user, BudgetKind::Embedding, 850, "e1")
            .await
            .unwrap();
        let flags = gov.flags(user).await.unwrap();
        assert!(flags.judge_disabled, "0.85 >= soft threshold 0.8");
        assert!(!flags.embedding_disabled);

        gov.reserve(user, BudgetKind::Embedding, 150, "e2")
            .await
            .unwrap();
        let flags = gov.flags(user).await.unwrap();
        assert!(flags.embedding_disabled, "1.0 >= hard cap");
    }

    #[tokio::test]
    async fn per_user_override_applies() {
        let (gov, _) = governor(1.0);
        let user = Uuid::new_v4();
        let gov = gov.with_cap_override(user, 0.1);

        let r = gov
            .reserve(user, BudgetKind::Embedding, 200, "e1")
            .await
            .unwrap();
        assert!(!r.allowed, "0.2 projected over 0.1 override cap");
    }

    #[tokio::test]
    async fn rollover_is_idempotent() {
        let (gov, store) = governor(1.0);
        let user = Uuid::new_v4();
        let date = Utc::now().date_naive();

        gov.reserve(user, BudgetKind::Embedding, 100, "e1")
            .await
            .unwrap();
        gov.rollover(&[user], date).await.unwrap();
        gov.rollover(&[user], date).await.unwrap();

        let usage = store.usage(user, date).await.unwrap();
        assert_eq!(usage.embedding_tokens_est, 100, "rollover must not reset spend");
    }
}
