use crate::store::StateStore;
use autodev_core::{AutodevError, AutodevResult};
use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Keeps workflow, task, and agent snapshots, mirroring them into an
/// optional [`StateStore`].
///
/// The local snapshot is always written first. A failed mirror write is
/// logged and otherwise ignored.
pub struct StateManager {
    store: Option<Arc<dyn StateStore>>,
    local: RwLock<HashMap<String, serde_json::Value>>,
    ttl: Option<Duration>,
}

impl StateManager {
    /// A manager with no backing store; snapshots live in memory only.
    pub fn new() -> Self {
        Self {
            store: None,
            local: RwLock::new(HashMap::new()),
            ttl: None,
        }
    }

    /// A manager mirroring into `store`.
    pub fn with_store(store: Arc<dyn StateStore>) -> Self {
        Self {
            store: Some(store),
            local: RwLock::new(HashMap::new()),
            ttl: None,
        }
    }

    /// Expire mirrored entries after `ttl`. Local snapshots never expire.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Whether snapshots are mirrored to a backing store.
    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Save a workflow snapshot under `workflow:<id>`.
    pub async fn save_workflow<T: Serialize>(
        &self,
        workflow_id: &str,
        workflow: &T,
    ) -> AutodevResult<()> {
        self.save(workflow_key(workflow_id), serde_json::to_value(workflow)?)
            .await;
        Ok(())
    }

    /// Load a workflow snapshot.
    pub async fn get_workflow(&self, workflow_id: &str) -> Option<serde_json::Value> {
        self.load(&workflow_key(workflow_id)).await
    }

    /// Save a task snapshot under `task:<id>`.
    pub async fn save_task<T: Serialize>(&self, task_id: &str, task: &T) -> AutodevResult<()> {
        self.save(task_key(task_id), serde_json::to_value(task)?).await;
        Ok(())
    }

    /// Load a task snapshot.
    pub async fn get_task(&self, task_id: &str) -> Option<serde_json::Value> {
        self.load(&task_key(task_id)).await
    }

    /// Save an agent snapshot, stamping it with `updated_at`.
    pub async fn save_agent_state<T: Serialize>(
        &self,
        agent: &str,
        state: &T,
    ) -> AutodevResult<()> {
        let mut value = serde_json::to_value(state)?;
        let stamp = serde_json::Value::String(Utc::now().to_rfc3339());
        match value.as_object_mut() {
            Some(map) => {
                map.insert("updated_at".to_string(), stamp);
            }
            None => {
                value = serde_json::json!({ "state": value, "updated_at": stamp });
            }
        }
        self.save(agent_key(agent), value).await;
        Ok(())
    }

    /// Load an agent snapshot.
    pub async fn get_agent_state(&self, agent: &str) -> Option<serde_json::Value> {
        self.load(&agent_key(agent)).await
    }

    /// Drop every local snapshot and the mirrored copies of those keys.
    pub async fn clear(&self) {
        let keys: Vec<String> = {
            let mut local = self.local.write();
            local.drain().map(|(k, _)| k).collect()
        };
        if let Some(store) = &self.store {
            for key in &keys {
                if !store.delete(key).await {
                    warn!(key = %key, "State store delete failed");
                }
            }
        }
        info!(keys = keys.len(), "State cleared");
    }

    async fn save(&self, key: String, value: serde_json::Value) {
        self.local.write().insert(key.clone(), value.clone());
        if let Some(store) = &self.store {
            if !store.set(&key, value, self.ttl).await {
                let err = AutodevError::StoreUnavailable(format!("write of '{key}' rejected"));
                warn!(key = %key, error = %err, "Keeping local snapshot only");
            }
        }
    }

    async fn load(&self, key: &str) -> Option<serde_json::Value> {
        if let Some(store) = &self.store {
            if let Some(value) = store.get(key).await {
                return Some(value);
            }
        }
        self.local.read().get(key).cloned()
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

fn workflow_key(id: &str) -> String {
    format!("workflow:{id}")
}

fn task_key(id: &str) -> String {
    format!("task:{id}")
}

fn agent_key(name: &str) -> String {
    format!("agent:{name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStateStore;

    #[tokio::test]
    async fn test_local_only_roundtrip() {
        let manager = StateManager::new();
        assert!(!manager.has_store());
        manager
            .save_workflow("wf-1", &serde_json::json!({"status": "created"}))
            .await
            .unwrap();

        let loaded = manager.get_workflow("wf-1").await.unwrap();
        assert_eq!(loaded["status"], "created");
        assert!(manager.get_workflow("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_mirrors_into_store() {
        let store = Arc::new(MemoryStateStore::new());
        let manager = StateManager::with_store(store.clone());
        manager
            .save_task("t1", &serde_json::json!({"state": "running"}))
            .await
            .unwrap();

        assert_eq!(
            store.get("task:t1").await,
            Some(serde_json::json!({"state": "running"}))
        );
    }

    #[tokio::test]
    async fn test_agent_state_is_stamped() {
        let manager = StateManager::new();
        manager
            .save_agent_state("backend", &serde_json::json!({"status": "idle"}))
            .await
            .unwrap();
        let state = manager.get_agent_state("backend").await.unwrap();
        assert_eq!(state["status"], "idle");
        assert!(state["updated_at"].is_string());

        manager.save_agent_state("raw", &7).await.unwrap();
        let state = manager.get_agent_state("raw").await.unwrap();
        assert_eq!(state["state"], 7);
    }

    #[tokio::test]
    async fn test_clear_removes_local_and_mirrored() {
        let store = Arc::new(MemoryStateStore::new());
        let manager = StateManager::with_store(store.clone());
        manager.save_task("t1", &1).await.unwrap();
        manager.save_workflow("w1", &2).await.unwrap();

        manager.clear().await;
        assert!(manager.get_task("t1").await.is_none());
        assert!(store.is_empty());
    }
}
