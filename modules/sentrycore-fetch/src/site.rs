//! List-page scraper for SITE sources, driven by per-source CSS selectors.

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::json;
use tracing::info;

use sentrycore_common::types::{SiteSelectors, SourceConfig};

use crate::retry::with_retries;
use crate::{FetchResult, FetchStatus, FetchedItem, Fetcher};

pub struct SiteFetcher {
    client: reqwest::Client,
    whitespace: Regex,
}

impl Default for SiteFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteFetcher {
    pub fn new() -> Self {
        Self {
            client: crate::http_client(),
            whitespace: Regex::new(r"\s+").expect("Invalid whitespace regex"),
        }
    }

    fn clean_text(&self, text: &str) -> String {
        self.whitespace.replace_all(text.trim(), " ").to_string()
    }

    /// Extract items from a list page. Containers whose title or link
    /// selector misses are skipped; any skip downgrades to `partial`.
    /// Invalid selector syntax is a config error, not a partial result.
    pub fn extract(
        &self,
        html: &str,
        list_url: &str,
        selectors: &SiteSelectors,
        max_items: usize,
    ) -> anyhow::Result<(Vec<FetchedItem>, FetchStatus)> {
        let item_sel = parse_selector(&selectors.item)?;
        let title_sel = parse_selector(&selectors.title)?;
        let link_sel = parse_selector(&selectors.link)?;
        let snippet_sel = selectors
            .snippet
            .as_deref()
            .map(parse_selector)
            .transpose()?;

        let base = url::Url::parse(list_url)?;
        let document = Html::parse_document(html);

        let mut items = Vec::new();
        let mut skipped = 0usize;
        for container in document.select(&item_sel) {
            if items.len() >= max_items {
                break;
            }

            let title = container
                .select(&title_sel)
                .next()
                .map(|el| self.clean_text(&el.text().collect::<String>()))
                .filter(|t| !t.is_empty());
            let href = container
                .select(&link_sel)
                .next()
                .and_then(|el| el.value().attr("href"))
                .and_then(|href| base.join(href).ok())
                .map(|u| u.to_string());

            let (title, url) = match (title, href) {
                (Some(t), Some(u)) => (t, u),
                _ => {
                    skipped += 1;
                    continue;
                }
            };

            let snippet = snippet_sel.as_ref().and_then(|sel| {
                container
                    .select(sel)
                    .next()
                    .map(|el| self.clean_text(&el.text().collect::<String>()))
                    .filter(|s| !s.is_empty())
            });

            items.push(FetchedItem {
                raw: json!({ "list_url": list_url }),
                url,
                title,
                snippet,
                published_at: None,
            });
        }

        let status = if skipped > 0 {
            FetchStatus::Partial
        } else {
            FetchStatus::Ok
        };
        Ok((items, status))
    }
}

fn parse_selector(css: &str) -> anyhow::Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow::anyhow!("invalid selector '{css}': {e:?}"))
}

#[async_trait]
impl Fetcher for SiteFetcher {
    async fn fetch(&self, config: &SourceConfig, max_items: usize) -> FetchResult {
        let started = std::time::Instant::now();
        let (list_url, selectors) = match config {
            SourceConfig::Site {
                list_url,
                selectors,
            } => (list_url, selectors),
            _ => return FetchResult::failed("Site fetcher given non-SITE config", 0),
        };

        let html = with_retries("site", || async {
            let resp = self.client.get(list_url).send().await?;
            let resp = resp.error_for_status()?;
            resp.text().await
        })
        .await;

        let elapsed = started.elapsed().as_millis() as u64;
        let html = match html {
            Ok(h) => h,
            Err(e) => return FetchResult::failed(format!("site fetch failed: {e}"), elapsed),
        };

        match self.extract(&html, list_url, selectors, max_items) {
            Ok((items, status)) => {
                info!(list_url, items = items.len(), "site: extracted list page");
                FetchResult {
                    status,
                    items,
                    error: None,
                    duration_ms: started.elapsed().as_millis() as u64,
                }
            }
            Err(e) => FetchResult::failed(format!("site extract failed: {e}"), elapsed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selectors() -> SiteSelectors {
        SiteSelectors {
            item: "li.post".to_string(),
            title: "h2".to_string(),
            link: "a".to_string(),
            snippet: Some("p.summary".to_string()),
        }
    }

    const PAGE: &str = r#"<html><body><ul>
        <li class="post">
            <h2> First   Post </h2>
            <a href="/posts/1">read</a>
            <p class="summary">A   short
            summary</p>
        </li>
        <li class="post">
            <h2>Second Post</h2>
            <a href="https://other.example.com/2">read</a>
        </li>
        <li class="post"><h2>No link here</h2></li>
    </ul></body></html>"#;

    #[test]
    fn extracts_items_and_resolves_relative_links() {
        let fetcher = SiteFetcher::new();
        let (items, status) = fetcher
            .extract(PAGE, "https://blog.example.com/list", &selectors(), 10)
            .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "First Post");
        assert_eq!(items[0].url, "https://blog.example.com/posts/1");
        assert_eq!(items[0].snippet.as_deref(), Some("A short summary"));
        assert_eq!(items[1].url, "https://other.example.com/2");
        // The linkless container was skipped.
        assert_eq!(status, FetchStatus::Partial);
    }

    #[test]
    fn respects_max_items() {
        let fetcher = SiteFetcher::new();
        let (items, _) = fetcher
            .extract(PAGE, "https://blog.example.com/list", &selectors(), 1)
            .unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn invalid_selector_is_an_error() {
        let fetcher = SiteFetcher::new();
        let mut bad = selectors();
        bad.item = "li[".to_string();
        assert!(fetcher
            .extract(PAGE, "https://blog.example.com/list", &bad, 10)
            .is_err());
    }
}
