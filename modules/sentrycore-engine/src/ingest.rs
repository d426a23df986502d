//! Ingest coordinator: canonicalise fetched postings, dedupe on url_hash,
//! persist new items and the per-fetch ingest log.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use sentrycore_common::types::{IngestLog, IngestStatus, Item, Source};
use sentrycore_fetch::{FetchResult, FetchStatus};
use sentrycore_store::{IngestLogRepo, ItemRepo};

use crate::deps::Deps;

pub struct IngestOutcome {
    pub log: IngestLog,
    /// Items inserted by this fetch, in fetch order.
    pub new_items: Vec<Item>,
}

pub struct IngestCoordinator {
    deps: Deps,
}

impl IngestCoordinator {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }

    /// Persist one fetch's results. Opens the ingest log up front so a crash
    /// mid-ingest still leaves a failed row behind, then completes it with
    /// the worst of the fetcher status and any ingest error.
    pub async fn ingest(
        &self,
        source: &Source,
        result: &FetchResult,
        started_at: DateTime<Utc>,
    ) -> Result<IngestOutcome> {
        let mut log = IngestLog::start(source.id, started_at);
        self.deps.ingest_logs.insert_ingest_log(log.clone()).await?;

        if result.status == FetchStatus::Failed {
            log.complete(
                IngestStatus::Failed,
                0,
                0,
                0,
                result.error.clone(),
                Utc::now(),
            );
            self.deps.ingest_logs.update_ingest_log(log.clone()).await?;
            return Ok(IngestOutcome {
                log,
                new_items: Vec::new(),
            });
        }

        let mut new_items = Vec::new();
        let mut duplicates = 0usize;
        let mut insert_error: Option<String> = None;

        for fetched in &result.items {
            let mut item = Item::new(source.id, &fetched.url, &fetched.title);
            item.snippet = fetched.snippet.clone();
            item.published_at = fetched.published_at;
            item.raw_data = Some(fetched.raw.clone());

            match self.deps.items.create_item_if_not_exists(item).await {
                Ok(Some(inserted)) => new_items.push(inserted),
                Ok(None) => duplicates += 1,
                Err(e) => {
                    warn!(source = %source.name, error = %e, "item insert failed");
                    insert_error = Some(e.to_string());
                }
            }
        }

        let status = match (result.status, &insert_error) {
            (_, Some(_)) => IngestStatus::Partial,
            (FetchStatus::Partial, None) => IngestStatus::Partial,
            (FetchStatus::Ok, None) => IngestStatus::Success,
            (FetchStatus::Failed, _) => IngestStatus::Failed,
        };
        log.complete(
            status,
            result.items.len(),
            new_items.len(),
            duplicates,
            insert_error.or_else(|| result.error.clone()),
            Utc::now(),
        );
        self.deps.ingest_logs.update_ingest_log(log.clone()).await?;

        info!(
            source = %source.name,
            fetched = log.items_fetched,
            new = log.items_new,
            duplicate = log.items_duplicate,
            "ingest complete"
        );
        Ok(IngestOutcome { log, new_items })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentrycore_common::types::SourceConfig;
    use sentrycore_fetch::FetchedItem;
    use sentrycore_store::IngestLogRepo;

    fn source() -> Source {
        Source::new(
            "feed",
            SourceConfig::Rss {
                feed_url: "https://example.com/feed.xml".to_string(),
            },
        )
    }

    fn fetched(url: &str) -> FetchedItem {
        FetchedItem {
            url: url.to_string(),
            title: "title".to_string(),
            snippet: Some("snippet".to_string()),
            published_at: None,
            raw: serde_json::json!({}),
        }
    }

    fn ok_result(items: Vec<FetchedItem>) -> FetchResult {
        FetchResult {
            status: FetchStatus::Ok,
            items,
            error: None,
            duration_ms: 5,
        }
    }

    #[tokio::test]
    async fn cross_source_duplicate_counted_not_inserted() {
        let (deps, store) = Deps::in_memory();
        let coordinator = IngestCoordinator::new(deps);
        let source_a = source();
        let mut source_b = source();
        source_b.name = "feed-b".to_string();

        let first = coordinator
            .ingest(
                &source_a,
                &ok_result(vec![fetched("https://www.Example.com/A/?utm_source=x&b=2&a=1")]),
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(first.log.items_new, 1);
        assert_eq!(first.log.items_duplicate, 0);

        let second = coordinator
            .ingest(
                &source_b,
                &ok_result(vec![fetched("https://example.com/a?b=2&a=1#frag")]),
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(second.log.items_new, 0);
        assert_eq!(second.log.items_duplicate, 1);
        assert_eq!(second.log.status, IngestStatus::Success);

        let logs = store.ingest_logs_for(source_b.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].items_duplicate, 1);
    }

    #[tokio::test]
    async fn failed_fetch_writes_failed_log() {
        let (deps, store) = Deps::in_memory();
        let coordinator = IngestCoordinator::new(deps);
        let src = source();

        let outcome = coordinator
            .ingest(&src, &FetchResult::failed("503 from upstream", 12), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.log.status, IngestStatus::Failed);
        assert_eq!(
            outcome.log.error_message.as_deref(),
            Some("503 from upstream")
        );
        assert!(outcome.new_items.is_empty());

        let logs = store.ingest_logs_for(src.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn partial_fetch_status_carries_through() {
        let (deps, _) = Deps::in_memory();
        let coordinator = IngestCoordinator::new(deps);
        let src = source();

        let result = FetchResult {
            status: FetchStatus::Partial,
            items: vec![fetched("https://example.com/only")],
            error: None,
            duration_ms: 3,
        };
        let outcome = coordinator.ingest(&src, &result, Utc::now()).await.unwrap();
        assert_eq!(outcome.log.status, IngestStatus::Partial);
        assert_eq!(outcome.log.items_new, 1);
    }

    #[tokio::test]
    async fn new_items_start_pending() {
        let (deps, _) = Deps::in_memory();
        let coordinator = IngestCoordinator::new(deps);
        let src = source();

        let outcome = coordinator
            .ingest(&src, &ok_result(vec![fetched("https://example.com/x")]), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.new_items.len(), 1);
        assert_eq!(
            outcome.new_items[0].embedding_status,
            sentrycore_common::types::EmbeddingStatus::Pending
        );
        assert_eq!(outcome.new_items[0].snippet.as_deref(), Some("snippet"));
    }
}
