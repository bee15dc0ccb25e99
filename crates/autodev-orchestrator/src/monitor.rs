use crate::types::{AgentMetrics, AgentState, WorkerStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Tracks state and metrics for every agent that has executed a task.
///
/// Entries are created lazily the first time an agent is used.
#[derive(Clone)]
pub struct AgentMonitor {
    states: Arc<RwLock<HashMap<String, AgentState>>>,
}

impl AgentMonitor {
    /// Empty monitor.
    pub fn new() -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Mark an agent as working on a task.
    pub async fn start_task(&self, agent: &str, task_id: &str) {
        let mut states = self.states.write().await;
        let state = entry(&mut states, agent);
        state.current_task = Some(task_id.to_string());
        state.status = WorkerStatus::Working;
        state.metrics.tasks_started += 1;
    }

    /// Mark an agent as idle after a successful task.
    pub async fn finish_task(&self, agent: &str, duration_ms: u64) {
        let mut states = self.states.write().await;
        let state = entry(&mut states, agent);
        state.current_task = None;
        state.status = WorkerStatus::Idle;
        state.metrics.tasks_completed += 1;
        state.metrics.duration_ms += duration_ms;
    }

    /// Record a failed task for an agent.
    pub async fn record_error(&self, agent: &str, duration_ms: u64) {
        let mut states = self.states.write().await;
        let state = entry(&mut states, agent);
        state.current_task = None;
        state.status = WorkerStatus::Error;
        state.metrics.tasks_failed += 1;
        state.metrics.duration_ms += duration_ms;
    }

    /// Get a snapshot of all agent states, sorted by agent name.
    pub async fn snapshot(&self) -> Vec<AgentState> {
        let states = self.states.read().await;
        let mut all: Vec<AgentState> = states.values().cloned().collect();
        all.sort_by(|a, b| a.agent.cmp(&b.agent));
        all
    }

    /// Get the state of a specific agent.
    pub async fn get_state(&self, agent: &str) -> Option<AgentState> {
        let states = self.states.read().await;
        states.get(agent).cloned()
    }

    /// Get aggregate metrics across all agents.
    pub async fn aggregate_metrics(&self) -> AgentMetrics {
        let states = self.states.read().await;
        let mut total = AgentMetrics::default();
        for state in states.values() {
            total.tasks_started += state.metrics.tasks_started;
            total.tasks_completed += state.metrics.tasks_completed;
            total.tasks_failed += state.metrics.tasks_failed;
            total.duration_ms += state.metrics.duration_ms;
        }
        total
    }

    /// Serialize the current state as JSON.
    pub async fn to_json(&self) -> serde_json::Value {
        let states = self.snapshot().await;
        let aggregate = self.aggregate_metrics().await;
        serde_json::json!({
            "agents": states,
            "aggregate": aggregate,
        })
    }
}

impl Default for AgentMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn entry<'a>(states: &'a mut HashMap<String, AgentState>, agent: &str) -> &'a mut AgentState {
    states
        .entry(agent.to_string())
        .or_insert_with(|| AgentState {
            agent: agent.to_string(),
            current_task: None,
            status: WorkerStatus::Idle,
            metrics: AgentMetrics::default(),
        })
}
