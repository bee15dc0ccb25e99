use async_trait::async_trait;
use autodev_core::AutodevResult;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::warn;

/// Key/value adapter used to mirror orchestrator snapshots.
///
/// Implementations never return errors: an unreachable backend reports
/// `false` from writes and `None` from reads.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Store `value` under `key`, expiring after `ttl` when given.
    async fn set(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>) -> bool;
    /// Live value for `key`; `None` when missing, expired or unreadable.
    async fn get(&self, key: &str) -> Option<serde_json::Value>;
    /// Remove `key`. Returns whether anything was deleted.
    async fn delete(&self, key: &str) -> bool;
}

/// In-process store with optional per-key expiry.
pub struct MemoryStateStore {
    entries: Mutex<HashMap<String, (serde_json::Value, Option<Instant>)>>,
}

impl MemoryStateStore {
    /// Empty store.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|(_, expiry)| expiry.map_or(true, |at| at > now))
            .count()
    }

    /// True when no live keys remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn set(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>) -> bool {
        let expiry = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.lock().insert(key.to_string(), (value, expiry));
        true
    }

    async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((_, Some(at))) if *at <= Instant::now() => {
                entries.remove(key);
                None
            }
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }

    async fn delete(&self, key: &str) -> bool {
        self.entries.lock().remove(key);
        true
    }
}

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    value: serde_json::Value,
    expires_at: Option<DateTime<Utc>>,
}

/// File-based store: one JSON document per key inside a directory.
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Open (creating if needed) the store directory.
    pub async fn new(dir: PathBuf) -> AutodevResult<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_key(key)))
    }
}

/// Keys like `workflow:abc` are not portable file names; escape everything
/// outside `[A-Za-z0-9_-]` as `%XX`.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn set(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>) -> bool {
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| Utc::now() + ttl);
        let entry = StoredEntry { value, expires_at };
        let json = match serde_json::to_string_pretty(&entry) {
            Ok(json) => json,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to encode state entry");
                return false;
            }
        };
        match tokio::fs::write(self.entry_path(key), json).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %key, dir = %self.dir.display(), error = %e, "File store write failed");
                false
            }
        }
    }

    async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let path = self.entry_path(key);
        let data = tokio::fs::read_to_string(&path).await.ok()?;
        let entry: StoredEntry = match serde_json::from_str(&data) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %key, error = %e, "Corrupt state entry");
                return None;
            }
        };
        if entry.expires_at.is_some_and(|at| at <= Utc::now()) {
            let _ = tokio::fs::remove_file(path).await;
            return None;
        }
        Some(entry.value)
    }

    async fn delete(&self, key: &str) -> bool {
        let path = self.entry_path(key);
        if !path.exists() {
            return true;
        }
        match tokio::fs::remove_file(path).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %key, error = %e, "File store delete failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_set_get_delete() {
        let store = MemoryStateStore::new();
        assert!(store.is_empty());
        assert!(store.set("k", serde_json::json!({"a": 1}), None).await);
        assert_eq!(store.get("k").await, Some(serde_json::json!({"a": 1})));
        assert_eq!(store.len(), 1);

        assert!(store.delete("k").await);
        assert!(store.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_memory_ttl_expiry() {
        let store = MemoryStateStore::new();
        store
            .set("short", serde_json::json!(1), Some(Duration::from_millis(10)))
            .await;
        store.set("long", serde_json::json!(2), None).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(store.get("short").await.is_none());
        assert_eq!(store.get("long").await, Some(serde_json::json!(2)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_encode_key() {
        assert_eq!(encode_key("workflow:wf-1"), "workflow%3Awf-1");
        assert_eq!(encode_key("agent:../x"), "agent%3A%2E%2E%2Fx");
        assert_eq!(encode_key("plain_key"), "plain_key");
    }
}
