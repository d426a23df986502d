//! NewsNow aggregator fetcher: one upstream source per configured source_id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use sentrycore_common::types::SourceConfig;

use crate::retry::with_retries;
use crate::{FetchResult, FetchStatus, FetchedItem, Fetcher};

pub struct NewsNowFetcher {
    client: reqwest::Client,
}

impl Default for NewsNowFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl NewsNowFetcher {
    pub fn new() -> Self {
        Self {
            client: crate::http_client(),
        }
    }

    /// Map a NewsNow list payload (`{"items": [...]}`) to fetched items.
    /// Records missing a url or title are skipped; skipping any record
    /// downgrades the status to `partial`.
    pub fn map_payload(
        payload: &serde_json::Value,
        max_items: usize,
    ) -> (Vec<FetchedItem>, FetchStatus) {
        let records = payload
            .get("items")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let total = records.len();

        let items: Vec<FetchedItem> = records
            .into_iter()
            .filter_map(|record| {
                let url = record.get("url")?.as_str()?.to_string();
                let title = record.get("title")?.as_str()?.to_string();
                let extra = record.get("extra");
                let snippet = extra
                    .and_then(|e| e.get("hover").or_else(|| e.get("info")))
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                let published_at = extra
                    .and_then(|e| e.get("date"))
                    .and_then(|v| v.as_i64())
                    .and_then(|ms| DateTime::<Utc>::from_timestamp_millis(ms));
                Some(FetchedItem {
                    url,
                    title,
                    snippet,
                    published_at,
                    raw: record,
                })
            })
            .take(max_items)
            .collect();

        let status = if items.len() < total.min(max_items) {
            FetchStatus::Partial
        } else {
            FetchStatus::Ok
        };
        (items, status)
    }
}

#[async_trait]
impl Fetcher for NewsNowFetcher {
    async fn fetch(&self, config: &SourceConfig, max_items: usize) -> FetchResult {
        let started = std::time::Instant::now();
        let (base_url, source_id) = match config {
            SourceConfig::Newsnow {
                base_url,
                source_id,
            } => (base_url, source_id),
            _ => return FetchResult::failed("NewsNow fetcher given non-NewsNow config", 0),
        };

        let url = format!("{}/api/sources/{}", base_url.trim_end_matches('/'), source_id);
        let payload = with_retries("newsnow", || async {
            let resp = self.client.get(&url).send().await?;
            let resp = resp.error_for_status()?;
            resp.json::<serde_json::Value>().await
        })
        .await;

        let elapsed = started.elapsed().as_millis() as u64;
        let payload = match payload {
            Ok(p) => p,
            Err(e) => return FetchResult::failed(format!("newsnow fetch failed: {e}"), elapsed),
        };

        let (items, status) = Self::map_payload(&payload, max_items);
        info!(source_id, items = items.len(), "newsnow: mapped payload");
        FetchResult {
            status,
            items,
            error: None,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}
