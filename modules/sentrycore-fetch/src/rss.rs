//! RSS/Atom fetcher.

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use sentrycore_common::types::SourceConfig;

use crate::retry::with_retries;
use crate::{FetchResult, FetchStatus, FetchedItem, Fetcher};

pub struct RssFetcher {
    client: reqwest::Client,
}

impl Default for RssFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl RssFetcher {
    pub fn new() -> Self {
        Self {
            client: crate::http_client(),
        }
    }

    /// Parse feed bytes into items, newest first. Entries without a usable
    /// link are skipped; if any entry was skipped the status is `partial`.
    pub fn parse_feed(bytes: &[u8], max_items: usize) -> anyhow::Result<(Vec<FetchedItem>, FetchStatus)> {
        let feed = feed_rs::parser::parse(bytes)?;
        let total = feed.entries.len();

        let mut items: Vec<FetchedItem> = feed
            .entries
            .into_iter()
            .filter_map(|entry| {
                let url = entry
                    .links
                    .first()
                    .map(|l| l.href.clone())
                    .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()))?;

                let title = entry.title.map(|t| t.content).unwrap_or_default();
                let published_at = entry
                    .published
                    .or(entry.updated)
                    .map(|dt| dt.with_timezone(&chrono::Utc));
                let snippet = entry.summary.map(|s| s.content);

                Some(FetchedItem {
                    raw: json!({ "entry_id": entry.id }),
                    url,
                    title,
                    snippet,
                    published_at,
                })
            })
            .collect();

        let decoded = items.len();
        items.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        items.truncate(max_items);

        let status = if decoded < total {
            FetchStatus::Partial
        } else {
            FetchStatus::Ok
        };
        Ok((items, status))
    }
}

#[async_trait]
impl Fetcher for RssFetcher {
    async fn fetch(&self, config: &SourceConfig, max_items: usize) -> FetchResult {
        let started = std::time::Instant::now();
        let feed_url = match config {
            SourceConfig::Rss { feed_url } => feed_url,
            _ => return FetchResult::failed("RSS fetcher given non-RSS config", 0),
        };

        let bytes = with_retries("rss", || async {
            let resp = self.client.get(feed_url).send().await?;
            let resp = resp.error_for_status()?;
            resp.bytes().await
        })
        .await;

        let elapsed = started.elapsed().as_millis() as u64;
        let bytes = match bytes {
            Ok(b) => b,
            Err(e) => return FetchResult::failed(format!("feed fetch failed: {e}"), elapsed),
        };

        match Self::parse_feed(&bytes, max_items) {
            Ok((items, status)) => {
                info!(feed_url, items = items.len(), "rss: parsed feed");
                FetchResult {
                    status,
                    items,
                    error: None,
                    duration_ms: started.elapsed().as_millis() as u64,
                }
            }
            Err(e) => FetchResult::failed(format!("feed parse failed: {e}"), elapsed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example Feed</title>
    <item>
      <title>Older story</title>
      <link>https://example.com/older</link>
      <description>old</description>
      <pubDate>Mon, 01 Jan 2024 08:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Newer story</title>
      <link>https://example.com/newer</link>
      <description>new</description>
      <pubDate>Tue, 02 Jan 2024 08:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Third story</title>
      <link>https://example.com/third</link>
      <pubDate>Wed, 03 Jan 2024 08:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_newest_first_up_to_max() {
        let (items, status) = RssFetcher::parse_feed(FEED.as_bytes(), 2).unwrap();
        assert_eq!(status, FetchStatus::Ok);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].url, "https://example.com/third");
        assert_eq!(items[1].url, "https://example.com/newer");
        assert_eq!(items[1].snippet.as_deref(), Some("new"));
    }

    #[test]
    fn entry_without_link_makes_result_partial() {
        let feed = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>t</title>
  <item><title>no link</title></item>
  <item><title>ok</title><link>https://example.com/a</link></item>
</channel></rss>"#;
        let (items, status) = RssFetcher::parse_feed(feed.as_bytes(), 10).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(status, FetchStatus::Partial);
    }

    #[test]
    fn garbage_bytes_fail_to_parse() {
        assert!(RssFetcher::parse_feed(b"not a feed", 10).is_err());
    }
}
