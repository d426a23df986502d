//! Fetch scheduler: each sweep claims due sources, runs their fetch job, and
//! writes the success/backoff bookkeeping back to the source row.
//!
//! All scheduling state lives on the Source row; the scheduler itself is
//! stateless across ticks, so any number of engine replicas can sweep as
//! long as the store's claim semantics hold.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{error, info};

use sentrycore_common::types::Item;
use sentrycore_fetch::{FetchStatus, FetcherResolver};
use sentrycore_store::SourceRepo;

use crate::deps::Deps;
use crate::ingest::IngestCoordinator;

#[derive(Debug, Default)]
pub struct SweepStats {
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub items_new: usize,
}

pub struct FetchScheduler {
    deps: Deps,
    fetchers: Arc<dyn FetcherResolver>,
    ingest: Arc<IngestCoordinator>,
    sources_per_sweep: usize,
    items_per_fetch: usize,
    empty_streak_threshold: u32,
    empty_cooldown_factor: u32,
}

impl FetchScheduler {
    pub fn new(
        deps: Deps,
        fetchers: Arc<dyn FetcherResolver>,
        ingest: Arc<IngestCoordinator>,
        sources_per_sweep: usize,
        items_per_fetch: usize,
        empty_streak_threshold: u32,
        empty_cooldown_factor: u32,
    ) -> Self {
        Self {
            deps,
            fetchers,
            ingest,
            sources_per_sweep,
            items_per_fetch,
            empty_streak_threshold,
            empty_cooldown_factor,
        }
    }

    /// One scheduler tick. Returns the new items ingested this sweep so the
    /// caller can feed them onward.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<(SweepStats, Vec<Item>)> {
        let due = self
            .deps
            .sources
            .claim_due_sources(now, self.sources_per_sweep)
            .await?;

        let mut stats = SweepStats {
            dispatched: due.len(),
            ..Default::default()
        };
        let mut new_items = Vec::new();

        for mut source in due {
            let fetcher = self.fetchers.for_type(source.source_type());
            let result = fetcher.fetch(&source.config, self.items_per_fetch).await;

            match self.ingest.ingest(&source, &result, now).await {
                Ok(outcome) => {
                    if result.status == FetchStatus::Failed {
                        source.mark_fetch_error(Utc::now());
                        stats.failed += 1;
                    } else {
                        source.mark_fetch_success(
                            result.items.len(),
                            Utc::now(),
                            self.empty_streak_threshold,
                            self.empty_cooldown_factor,
                        );
                        stats.succeeded += 1;
                    }
                    stats.items_new += outcome.new_items.len();
                    new_items.extend(outcome.new_items);
                    self.deps.sources.update_source(source).await?;
                }
                Err(e) => {
                    // Dispatch error: leave scheduling fields untouched so
                    // the row stays eligible on the next tick.
                    error!(source = %source.name, error = %e, "fetch dispatch failed");
                    self.deps.sources.release_claim(source.id).await?;
                }
            }
        }

        if stats.dispatched > 0 {
            info!(
                dispatched = stats.dispatched,
                succeeded = stats.succeeded,
                failed = stats.failed,
                items_new = stats.items_new,
                "scheduler sweep complete"
            );
        }
        Ok((stats, new_items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sentrycore_common::types::{EmbeddingStatus, Source, SourceConfig, SourceType};
    use sentrycore_fetch::{FetchResult, FetchedItem, Fetcher};
    use sentrycore_store::ItemRepo;

    /// Scripted fetcher: one canned result per sweep, no network.
    struct ScriptedFetcher {
        result: fn() -> FetchResult,
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, _config: &SourceConfig, _max: usize) -> FetchResult {
            (self.result)()
        }
    }

    impl FetcherResolver for ScriptedFetcher {
        fn for_type(&self, _source_type: SourceType) -> &dyn Fetcher {
            self
        }
    }

    fn one_item() -> FetchResult {
        FetchResult {
            status: FetchStatus::Ok,
            items: vec![FetchedItem {
                url: "https://example.com/story".to_string(),
                title: "Story".to_string(),
                snippet: None,
                published_at: None,
                raw: serde_json::json!({}),
            }],
            error: None,
            duration_ms: 1,
        }
    }

    fn upstream_down() -> FetchResult {
        FetchResult::failed("503 from upstream", 3)
    }

    fn scheduler_with(
        deps: Deps,
        result: fn() -> FetchResult,
    ) -> FetchScheduler {
        let ingest = Arc::new(IngestCoordinator::new(deps.clone()));
        FetchScheduler::new(
            deps,
            Arc::new(ScriptedFetcher { result }),
            ingest,
            10,
            20,
            5,
            4,
        )
    }

    fn rss_source(name: &str, interval: u32) -> Source {
        let mut source = Source::new(
            name,
            SourceConfig::Rss {
                feed_url: format!("https://{name}.example.com/feed.xml"),
            },
        );
        source.fetch_interval_sec = interval;
        source
    }

    #[tokio::test]
    async fn disabled_sources_are_never_selected() {
        let (_deps, store) = Deps::in_memory();
        let mut source = rss_source("disabled", 1800);
        source.enabled = false;
        store.insert_source(source).await.unwrap();

        let due = store.claim_due_sources(Utc::now(), 10).await.unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn sweep_ingests_items_and_reschedules() {
        let (deps, store) = Deps::in_memory();
        let scheduler = scheduler_with(deps, one_item);
        let source = rss_source("healthy", 1800);
        let id = source.id;
        store.insert_source(source).await.unwrap();

        let (stats, items) = scheduler.sweep(Utc::now()).await.unwrap();
        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.items_new, 1);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].embedding_status, EmbeddingStatus::Pending);

        let source = store.get_source(id).await.unwrap().unwrap();
        assert_eq!(source.error_streak, 0);
        let delay = (source.next_fetch_at.unwrap() - source.last_fetch_at.unwrap()).num_seconds();
        assert_eq!(delay, 1800);

        // Stored item is retrievable by the embed worker.
        let pending = store.pending_embedding(10).await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn failed_fetch_applies_backoff_and_stays_scheduled() {
        let (deps, store) = Deps::in_memory();
        let scheduler = scheduler_with(deps, upstream_down);
        let source = rss_source("unreachable", 1800);
        let id = source.id;
        store.insert_source(source).await.unwrap();

        let now = Utc::now();
        let (stats, items) = scheduler.sweep(now).await.unwrap();
        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.failed, 1);
        assert!(items.is_empty());

        let source = store.get_source(id).await.unwrap().unwrap();
        assert_eq!(source.error_streak, 1);
        let delay = (source.next_fetch_at.unwrap() - source.last_fetch_at.unwrap()).num_seconds();
        assert_eq!(delay, 1800 * 2);

        // Not due again until the backoff elapses.
        let due = store.claim_due_sources(Utc::now(), 10).await.unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn repeated_failures_clamp_at_four_hours() {
        let (deps, store) = Deps::in_memory();
        let scheduler = scheduler_with(deps, upstream_down);
        let source = rss_source("flapping", 1800);
        let id = source.id;
        store.insert_source(source).await.unwrap();

        // Drive three failing sweeps, forcing eligibility between them.
        for _ in 0..3 {
            let mut source = store.get_source(id).await.unwrap().unwrap();
            source.next_fetch_at = Some(Utc::now() - chrono::Duration::seconds(1));
            store.update_source(source).await.unwrap();
            scheduler.sweep(Utc::now()).await.unwrap();
        }

        let source = store.get_source(id).await.unwrap().unwrap();
        assert_eq!(source.error_streak, 3);
        let delay = (source.next_fetch_at.unwrap() - source.last_fetch_at.unwrap()).num_seconds();
        assert_eq!(delay, 14_400, "1800 * 2^3 clamps at 4h");
    }
}
