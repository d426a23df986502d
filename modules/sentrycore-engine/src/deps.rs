//! Repository handles shared by the engine components.
//!
//! Each field is a trait object so a SQL-backed store can replace the
//! in-memory one without touching the engine. The in-memory constructor
//! points every handle at the same [`MemoryStore`].

use std::sync::Arc;

use sentrycore_store::{
    DecisionRepo, FeedbackRepo, GoalRepo, IngestLogRepo, ItemRepo, KvStore, MemoryKv, MemoryStore,
    OutboxRepo, RunRepo, SourceRepo, SubscriptionRepo, UserRepo,
};

#[derive(Clone)]
pub struct Deps {
    pub sources: Arc<dyn SourceRepo>,
    pub subscriptions: Arc<dyn SubscriptionRepo>,
    pub items: Arc<dyn ItemRepo>,
    pub goals: Arc<dyn GoalRepo>,
    pub matches: Arc<dyn sentrycore_store::MatchRepo>,
    pub decisions: Arc<dyn DecisionRepo>,
    pub budgets: Arc<dyn sentrycore_store::BudgetRepo>,
    pub feedback: Arc<dyn FeedbackRepo>,
    pub ingest_logs: Arc<dyn IngestLogRepo>,
    pub runs: Arc<dyn RunRepo>,
    pub outbox: Arc<dyn OutboxRepo>,
    pub users: Arc<dyn UserRepo>,
    pub kv: Arc<dyn KvStore>,
}

impl Deps {
    /// Wire every repository to a single shared in-memory store.
    pub fn in_memory() -> (Self, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let deps = Self {
            sources: store.clone(),
            subscriptions: store.clone(),
            items: store.clone(),
            goals: store.clone(),
            matches: store.clone(),
            decisions: store.clone(),
            budgets: store.clone(),
            feedback: store.clone(),
            ingest_logs: store.clone(),
            runs: store.clone(),
            outbox: store.clone(),
            users: store.clone(),
            kv: Arc::new(MemoryKv::new()),
        };
        (deps, store)
    }
}
