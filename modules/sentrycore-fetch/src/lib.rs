//! Network adapters for the three source kinds.
//!
//! Each fetcher turns a source config into a list of raw [`FetchedItem`]s.
//! The set is closed (NEWSNOW / RSS / SITE); a factory keyed on
//! [`SourceType`] hands out the right variant. Fetchers never touch the
//! store — normalisation and dedupe happen downstream in the ingest
//! coordinator.

pub mod catalog;
mod newsnow;
mod retry;
mod rss;
mod site;

pub use catalog::{NewsNowCatalog, NewsNowCatalogProvider, NewsNowCatalogSource};
pub use newsnow::NewsNowFetcher;
pub use rss::RssFetcher;
pub use site::SiteFetcher;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sentrycore_common::types::{SourceConfig, SourceType};

/// Network timeout for all fetcher HTTP calls.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Ok,
    Partial,
    Failed,
}

/// One raw posting as returned by a fetcher, before canonicalisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedItem {
    pub url: String,
    pub title: String,
    pub snippet: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub status: FetchStatus,
    pub items: Vec<FetchedItem>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl FetchResult {
    pub fn failed(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            status: FetchStatus::Failed,
            items: Vec::new(),
            error: Some(error.into()),
            duration_ms,
        }
    }
}

/// A network adapter for one source kind.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch up to `max_items` postings for the given config. Never returns
    /// Err: network and parse failures surface as `FetchStatus::Failed` so
    /// the scheduler's backoff bookkeeping has one code path.
    async fn fetch(&self, config: &SourceConfig, max_items: usize) -> FetchResult;
}

/// Lookup seam over the closed fetcher set. The factory implements it for
/// production; the scheduler's tests substitute scripted fetchers.
pub trait FetcherResolver: Send + Sync {
    fn for_type(&self, source_type: SourceType) -> &dyn Fetcher;
}

/// Factory over the closed fetcher set.
pub struct FetcherFactory {
    rss: RssFetcher,
    newsnow: NewsNowFetcher,
    site: SiteFetcher,
}

impl Default for FetcherFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl FetcherFactory {
    pub fn new() -> Self {
        Self {
            rss: RssFetcher::new(),
            newsnow: NewsNowFetcher::new(),
            site: SiteFetcher::new(),
        }
    }
}

impl FetcherResolver for FetcherFactory {
    fn for_type(&self, source_type: SourceType) -> &dyn Fetcher {
        match source_type {
            SourceType::Rss => &self.rss,
            SourceType::Newsnow => &self.newsnow,
            SourceType::Site => &self.site,
        }
    }
}

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .user_agent("sentrycore/0.1")
        .build()
        .expect("Failed to build fetcher HTTP client")
}
