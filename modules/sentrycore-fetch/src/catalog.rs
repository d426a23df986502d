//! NewsNow source catalog: remote JSON with a local snapshot fallback.
//!
//! The catalog maps upstream source ids to display metadata and a `disable`
//! marker. The marker is messy in the wild: a boolean disables, the string
//! `"cf"` (Cloudflare-gated but reachable) does NOT disable, and any other
//! truthy string disables.

use async_trait::async_trait;
use anyhow::{Context, Result};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct NewsNowCatalogSource {
    pub source_id: String,
    pub name: String,
    pub title: Option<String>,
    pub interval_ms: Option<u64>,
    pub disable: bool,
    pub redirect: Option<String>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogOrigin {
    Remote,
    Snapshot,
}

#[derive(Debug, Clone)]
pub struct NewsNowCatalog {
    pub sources: Vec<NewsNowCatalogSource>,
    pub loaded_from: CatalogOrigin,
}

#[async_trait]
pub trait NewsNowCatalogProvider: Send + Sync {
    async fn load_catalog(&self) -> Result<NewsNowCatalog>;
}

/// Loads the catalog over HTTP, falling back to a snapshot file on disk.
pub struct HttpCatalogProvider {
    catalog_url: String,
    snapshot_path: String,
    client: reqwest::Client,
}

impl HttpCatalogProvider {
    pub fn new(catalog_url: impl Into<String>, snapshot_path: impl Into<String>) -> Self {
        Self {
            catalog_url: catalog_url.into(),
            snapshot_path: snapshot_path.into(),
            client: crate::http_client(),
        }
    }

    /// Parse the raw catalog map `{source_id: {name, title?, interval?,
    /// disable?, redirect?}, ...}`.
    pub fn parse_catalog(payload: &serde_json::Value, origin: CatalogOrigin) -> NewsNowCatalog {
        let mut sources = Vec::new();
        if let Some(map) = payload.as_object() {
            for (source_id, record) in map {
                let name = record
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or(source_id)
                    .to_string();
                sources.push(NewsNowCatalogSource {
                    source_id: source_id.clone(),
                    name,
                    title: record
                        .get("title")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                    interval_ms: record.get("interval").and_then(|v| v.as_u64()),
                    disable: parse_disable(record.get("disable")),
                    redirect: record
                        .get("redirect")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                    raw: record.clone(),
                });
            }
        }
        sources.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        NewsNowCatalog {
            sources,
            loaded_from: origin,
        }
    }

    async fn load_remote(&self) -> Result<NewsNowCatalog> {
        let payload: serde_json::Value = self
            .client
            .get(&self.catalog_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(Self::parse_catalog(&payload, CatalogOrigin::Remote))
    }

    fn load_snapshot(&self) -> Result<NewsNowCatalog> {
        let bytes = std::fs::read(&self.snapshot_path)
            .with_context(|| format!("failed to read catalog snapshot {}", self.snapshot_path))?;
        let payload: serde_json::Value =
            serde_json::from_slice(&bytes).context("failed to parse catalog snapshot")?;
        Ok(Self::parse_catalog(&payload, CatalogOrigin::Snapshot))
    }
}

#[async_trait]
impl NewsNowCatalogProvider for HttpCatalogProvider {
    async fn load_catalog(&self) -> Result<NewsNowCatalog> {
        if !self.catalog_url.is_empty() {
            match self.load_remote().await {
                Ok(catalog) => {
                    info!(sources = catalog.sources.len(), "catalog: loaded remote");
                    return Ok(catalog);
                }
                Err(e) => {
                    warn!(error = %e, "catalog: remote load failed, trying snapshot");
                }
            }
        }
        let catalog = self.load_snapshot()?;
        info!(sources = catalog.sources.len(), "catalog: loaded snapshot");
        Ok(catalog)
    }
}

fn parse_disable(value: Option<&serde_json::Value>) -> bool {
    match value {
        Some(serde_json::Value::Bool(b)) => *b,
        // "cf" means Cloudflare-gated, not disabled.
        Some(serde_json::Value::String(s)) => !s.is_empty() && s != "cf",
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_catalog_map() {
        let payload = json!({
            "hackernews": {"name": "Hacker News", "interval": 600000},
            "zreading": {"name": "Z Reading", "disable": true},
            "cfgated": {"name": "CF Gated", "disable": "cf"},
            "dead": {"name": "Dead", "disable": "true"},
            "moved": {"name": "Moved", "redirect": "elsewhere"}
        });
        let catalog = HttpCatalogProvider::parse_catalog(&payload, CatalogOrigin::Snapshot);
        assert_eq!(catalog.sources.len(), 5);

        let by_id = |id: &str| catalog.sources.iter().find(|s| s.source_id == id).unwrap();
        assert!(!by_id("hackernews").disable);
        assert_eq!(by_id("hackernews").interval_ms, Some(600_000));
        assert!(by_id("zreading").disable);
        assert!(!by_id("cfgated").disable, "\"cf\" is not disabled");
        assert!(by_id("dead").disable);
        assert_eq!(by_id("moved").redirect.as_deref(), Some("elsewhere"));
    }

    #[test]
    fn name_falls_back_to_source_id() {
        let payload = json!({"bare": {}});
        let catalog = HttpCatalogProvider::parse_catalog(&payload, CatalogOrigin::Remote);
        assert_eq!(catalog.sources[0].name, "bare");
        assert_eq!(catalog.loaded_from, CatalogOrigin::Remote);
    }
}
