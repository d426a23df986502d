//! Embedding worker: drains pending items in FIFO batches, reserves budget
//! per owning user, and records vectors or the terminal skip/fail status.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use uuid::Uuid;

use ai_client::EmbedProvider;
use sentrycore_common::types::{Item, Source};
use sentrycore_store::{ItemRepo, SourceRepo};

use crate::budget::{estimate_tokens, BudgetGovernor, BudgetKind, SYSTEM_USER};
use crate::deps::Deps;

pub struct EmbedWorker {
    deps: Deps,
    governor: Arc<BudgetGovernor>,
    embedder: Arc<dyn EmbedProvider>,
    batch_size: usize,
    /// Expected vector width; 0 disables the check.
    expected_dim: usize,
    error_count: AtomicU64,
}

impl EmbedWorker {
    pub fn new(
        deps: Deps,
        governor: Arc<BudgetGovernor>,
        embedder: Arc<dyn EmbedProvider>,
        batch_size: usize,
    ) -> Self {
        Self {
            deps,
            governor,
            embedder,
            batch_size,
            expected_dim: 0,
            error_count: AtomicU64::new(0),
        }
    }

    /// Enforce the configured vector dimension; the schema's vector column
    /// width must match, so a mismatched vector is a failed embedding.
    pub fn with_expected_dim(mut self, dim: usize) -> Self {
        self.expected_dim = dim;
        self
    }

    /// Provider errors observed since process start.
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// The budget bucket an item draws from: the owner for private sources,
    /// otherwise the shared system bucket.
    fn budget_user(source: Option<&Source>) -> Uuid {
        match source {
            Some(s) if s.is_private => s.owner_id.unwrap_or(SYSTEM_USER),
            _ => SYSTEM_USER,
        }
    }

    /// One embed tick: process up to `batch_size` pending items. Returns the
    /// ids of items embedded this tick, ready for match jobs.
    pub async fn run_once(&self) -> Result<Vec<Uuid>> {
        let pending = self.deps.items.pending_embedding(self.batch_size).await?;
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        // Budget-gate each item first so one provider call covers the batch.
        let mut allowed: Vec<Item> = Vec::new();
        let mut skipped = 0usize;
        for mut item in pending {
            let source = self.deps.sources.get_source(item.source_id).await?;
            let user = Self::budget_user(source.as_ref());

            let flags = self.governor.flags(user).await?;
            if flags.embedding_disabled {
                item.mark_embedding_skipped_budget();
                self.deps.items.update_item(item).await?;
                skipped += 1;
                continue;
            }

            let tokens = estimate_tokens(&item.embed_text());
            let reservation = self
                .governor
                .reserve(user, BudgetKind::Embedding, tokens, &format!("embed:{}", item.id))
                .await?;
            if !reservation.allowed {
                item.mark_embedding_skipped_budget();
                self.deps.items.update_item(item).await?;
                skipped += 1;
                continue;
            }
            allowed.push(item);
        }

        if allowed.is_empty() {
            if skipped > 0 {
                info!(skipped, "embed tick: all pending items budget-skipped");
            }
            return Ok(Vec::new());
        }

        let texts: Vec<String> = allowed.iter().map(|i| i.embed_text()).collect();
        let vectors = match self.embedder.embed_batch(&texts).await {
            Ok(v) => v,
            Err(e) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, items = allowed.len(), "embedding provider call failed");
                for mut item in allowed {
                    item.mark_embedding_failed();
                    self.deps.items.update_item(item).await?;
                }
                return Ok(Vec::new());
            }
        };

        let model = self.embedder.model_name().to_string();
        let mut embedded = Vec::with_capacity(allowed.len());
        for (mut item, vector) in allowed.into_iter().zip(vectors) {
            if self.expected_dim > 0 && vector.len() != self.expected_dim {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                warn!(
                    item = %item.id,
                    got = vector.len(),
                    expected = self.expected_dim,
                    "embedding dimension mismatch"
                );
                item.mark_embedding_failed();
                self.deps.items.update_item(item).await?;
                continue;
            }
            item.mark_embedding_done(vector, &model);
            embedded.push(item.id);
            self.deps.items.update_item(item).await?;
        }

        info!(embedded = embedded.len(), skipped, "embed tick complete");
        Ok(embedded)
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use async_trait::async_trait;

    /// Deterministic embedder: hashes term presence into a tiny vector so
    /// similar texts get similar vectors without a provider.
    pub struct FakeEmbedder {
        pub fail: std::sync::atomic::AtomicBool,
    }

    impl FakeEmbedder {
        pub fn new() -> Self {
            Self {
                fail: std::sync::atomic::AtomicBool::new(false),
            }
        }

        pub fn vector_for(text: &str) -> Vec<f32> {
            let lower = text.to_lowercase();
            let probes = ["rust", "release", "security", "game", "database"];
            let mut v: Vec<f32> = probes
                .iter()
                .map(|p| if lower.contains(p) { 1.0 } else { 0.0 })
                .collect();
            // Avoid the zero vector so cosine stays defined.
            v.push(0.1);
            v
        }
    }

    #[async_trait]
    impl EmbedProvider for FakeEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            if self.fail.load(Ordering::Relaxed) {
                anyhow::bail!("provider unavailable");
            }
            Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
        }

        fn model_name(&self) -> &str {
            "fake-embed-1"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::FakeEmbedder;
    use super::*;
    use sentrycore_common::types::{EmbeddingStatus, SourceConfig};
    use sentrycore_store::{ItemRepo, SourceRepo};

    fn governor(deps: &Deps, cap: f64) -> Arc<BudgetGovernor> {
        Arc::new(BudgetGovernor::new(
            deps.budgets.clone(),
            cap,
            0.8,
            1000.0,
            1000.0,
        ))
    }

    async fn seed_item(store: &Arc<sentrycore_store::MemoryStore>, url: &str, title: &str) -> Uuid {
        let source = sentrycore_common::types::Source::new(
            format!("src-{url}"),
            SourceConfig::Rss {
                feed_url: "https://example.com/feed".to_string(),
            },
        );
        let source_id = source.id;
        store.insert_source(source).await.unwrap();
        let item = Item::new(source_id, url, title);
        store
            .create_item_if_not_exists(item)
            .await
            .unwrap()
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn embeds_pending_items_and_records_model() {
        let (deps, store) = Deps::in_memory();
        let worker = EmbedWorker::new(
            deps.clone(),
            governor(&deps, 10.0),
            Arc::new(FakeEmbedder::new()),
            50,
        );
        let id = seed_item(&store, "https://example.com/rust", "Rust release notes").await;

        let embedded = worker.run_once().await.unwrap();
        assert_eq!(embedded, vec![id]);

        let item = store.get_item(id).await.unwrap().unwrap();
        assert_eq!(item.embedding_status, EmbeddingStatus::Done);
        assert_eq!(item.embedding_model.as_deref(), Some("fake-embed-1"));
        assert!(item.embedding.is_some());
    }

    #[tokio::test]
    async fn provider_failure_marks_failed_and_counts() {
        let (deps, store) = Deps::in_memory();
        let embedder = Arc::new(FakeEmbedder::new());
        embedder.fail.store(true, Ordering::Relaxed);
        let worker = EmbedWorker::new(deps.clone(), governor(&deps, 10.0), embedder, 50);
        let id = seed_item(&store, "https://example.com/a", "A").await;

        let embedded = worker.run_once().await.unwrap();
        assert!(embedded.is_empty());
        assert_eq!(worker.error_count(), 1);

        let item = store.get_item(id).await.unwrap().unwrap();
        assert_eq!(item.embedding_status, EmbeddingStatus::Failed);
    }

    #[tokio::test]
    async fn dimension_mismatch_fails_item() {
        let (deps, store) = Deps::in_memory();
        let worker = EmbedWorker::new(
            deps.clone(),
            governor(&deps, 10.0),
            Arc::new(FakeEmbedder::new()),
            50,
        )
        .with_expected_dim(1024);
        let id = seed_item(&store, "https://example.com/a", "A").await;

        let embedded = worker.run_once().await.unwrap();
        assert!(embedded.is_empty());
        let item = store.get_item(id).await.unwrap().unwrap();
        assert_eq!(item.embedding_status, EmbeddingStatus::Failed);
        assert_eq!(worker.error_count(), 1);
    }

    #[tokio::test]
    async fn exhausted_budget_skips_items() {
        let (deps, store) = Deps::in_memory();
        let gov = governor(&deps, 0.0001);
        // Exhaust the shared bucket.
        gov.reserve(SYSTEM_USER, BudgetKind::Embedding, 1, "seed")
            .await
            .unwrap();
        let worker = EmbedWorker::new(deps.clone(), gov, Arc::new(FakeEmbedder::new()), 50);
        let id = seed_item(&store, "https://example.com/a", "A very long headline here").await;

        let embedded = worker.run_once().await.unwrap();
        assert!(embedded.is_empty());

        let item = store.get_item(id).await.unwrap().unwrap();
        assert_eq!(item.embedding_status, EmbeddingStatus::SkippedBudget);
    }
}
