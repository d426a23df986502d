//! Key-value store for the 5-minute immediate buffers.
//!
//! Keys follow `buffer:immediate:{goal_id}:{bucket}` with a TTL safety net,
//! so a crashed flush loses at most one buffer window.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Append a value to the list at `key`, setting the TTL on first write.
    async fn push(&self, key: &str, value: serde_json::Value, ttl_secs: u64) -> Result<()>;

    /// Keys with the given prefix that have not expired.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove the list at `key` and return its values (empty if absent).
    async fn take(&self, key: &str) -> Result<Vec<serde_json::Value>>;
}

struct Entry {
    values: Vec<serde_json::Value>,
    expires_at: DateTime<Utc>,
}

/// In-process KV implementation.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn push(&self, key: &str, value: serde_json::Value, ttl_secs: u64) -> Result<()> {
        let mut entries = self.entries.lock().expect("kv mutex poisoned");
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            values: Vec::new(),
            expires_at: Utc::now() + Duration::seconds(ttl_secs as i64),
        });
        entry.values.push(value);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let now = Utc::now();
        let mut entries = self.entries.lock().expect("kv mutex poisoned");
        entries.retain(|_, e| e.expires_at > now);
        Ok(entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn take(&self, key: &str) -> Result<Vec<serde_json::Value>> {
        let mut entries = self.entries.lock().expect("kv mutex poisoned");
        Ok(entries.remove(key).map(|e| e.values).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_take_roundtrip() {
        let kv = MemoryKv::new();
        kv.push("buffer:immediate:g1:b1", serde_json::json!({"n": 1}), 600)
            .await
            .unwrap();
        kv.push("buffer:immediate:g1:b1", serde_json::json!({"n": 2}), 600)
            .await
            .unwrap();
        kv.push("buffer:immediate:g2:b1", serde_json::json!({"n": 3}), 600)
            .await
            .unwrap();

        let keys = kv.keys_with_prefix("buffer:immediate:g1:").await.unwrap();
        assert_eq!(keys.len(), 1);

        let values = kv.take("buffer:immediate:g1:b1").await.unwrap();
        assert_eq!(values.len(), 2);

        // Taking again returns nothing.
        assert!(kv.take("buffer:immediate:g1:b1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_keys_are_not_listed() {
        let kv = MemoryKv::new();
        kv.push("buffer:immediate:g1:old", serde_json::json!(1), 0)
            .await
            .unwrap();
        let keys = kv.keys_with_prefix("buffer:immediate:").await.unwrap();
        assert!(keys.is_empty());
    }
}
