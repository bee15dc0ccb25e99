use crate::capability::Capability;
use crate::config::OrchestratorConfig;
use crate::monitor::AgentMonitor;
use crate::types::{CoordinatorStatus, NewTask, Task, TaskState};
use autodev_core::{event_types, AutodevError, AutodevResult, EventBus};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const SOURCE: &str = "coordinator";

/// Task records in insertion order.
#[derive(Default)]
struct TaskRegistry {
    tasks: HashMap<String, Task>,
    order: Vec<String>,
}

impl TaskRegistry {
    fn insert(&mut self, task: Task) {
        self.order.push(task.id.clone());
        self.tasks.insert(task.id.clone(), task);
    }

    fn ordered(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    /// Pending tasks whose dependencies are all Completed, by descending
    /// priority. The sort is stable, so ties keep insertion order.
    fn ready(&self) -> Vec<Task> {
        let completed: HashSet<&str> = self
            .ordered()
            .filter(|t| t.state == TaskState::Completed)
            .map(|t| t.id.as_str())
            .collect();
        let mut ready: Vec<Task> = self
            .ordered()
            .filter(|t| t.is_ready(&completed))
            .cloned()
            .collect();
        ready.sort_by(|a, b| b.priority.cmp(&a.priority));
        ready
    }

    fn count(&self, state: TaskState) -> usize {
        self.tasks.values().filter(|t| t.state == state).count()
    }

    fn clear(&mut self) {
        self.tasks.clear();
        self.order.clear();
    }
}

/// Task registry and dependency-aware scheduler.
///
/// Cloning is cheap; clones share the same tasks, agents, bus and monitor.
#[derive(Clone)]
pub struct Coordinator {
    tasks: Arc<RwLock<TaskRegistry>>,
    agents: Arc<RwLock<HashMap<String, Arc<dyn Capability>>>>,
    bus: Arc<EventBus>,
    monitor: AgentMonitor,
    config: OrchestratorConfig,
}

impl Coordinator {
    /// Coordinator with default tunables publishing on `bus`.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self::with_config(bus, OrchestratorConfig::default())
    }

    /// Coordinator with explicit tunables.
    pub fn with_config(bus: Arc<EventBus>, config: OrchestratorConfig) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(TaskRegistry::default())),
            agents: Arc::new(RwLock::new(HashMap::new())),
            bus,
            monitor: AgentMonitor::new(),
            config,
        }
    }

    /// Bus that receives task lifecycle events.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Per-agent state and metrics.
    pub fn monitor(&self) -> &AgentMonitor {
        &self.monitor
    }

    /// Active tunables.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Bind `name` to a capability, replacing any previous binding.
    pub async fn register_agent(&self, name: impl Into<String>, capability: Arc<dyn Capability>) {
        let name = name.into();
        info!(agent = %name, "Agent registered");
        self.agents.write().await.insert(name, capability);
    }

    /// Remove an agent binding. Returns false if it was not registered.
    pub async fn unregister_agent(&self, name: &str) -> bool {
        self.agents.write().await.remove(name).is_some()
    }

    /// Registered agent names, sorted.
    pub async fn agent_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Validate and store a new Pending task, returning its id.
    ///
    /// Every dependency must name an existing task, so a dependency cycle (or
    /// a task depending on itself) can never be built. A request without a
    /// priority gets [`OrchestratorConfig::default_priority`].
    pub async fn create_task(&self, request: NewTask) -> AutodevResult<String> {
        if request.title.trim().is_empty() {
            return Err(AutodevError::Validation("task title cannot be empty".to_string()));
        }
        if request.agent.trim().is_empty() {
            return Err(AutodevError::Validation("task agent cannot be empty".to_string()));
        }

        let task = Task::from_request(request, self.config.default_priority);
        let mut registry = self.tasks.write().await;
        for dep in &task.dependencies {
            if !registry.tasks.contains_key(dep) {
                return Err(AutodevError::Validation(format!(
                    "task '{}' depends on unknown task '{dep}'",
                    task.title
                )));
            }
        }

        let id = task.id.clone();
        info!(
            task_id = %id,
            agent = %task.assigned_agent,
            priority = task.priority,
            dependencies = task.dependencies.len(),
            "Task created"
        );
        registry.insert(task);
        Ok(id)
    }

    /// Tasks eligible to run right now, highest priority first.
    pub async fn get_ready_tasks(&self) -> Vec<Task> {
        self.tasks.read().await.ready()
    }

    /// Run one task through its agent.
    ///
    /// Fails with `NotFound` for an unknown id and `Validation` when the task
    /// is not Pending. An agent failure is not an error here: it is recorded
    /// on the task, which ends Failed.
    pub async fn execute_task(&self, task_id: &str) -> AutodevResult<TaskState> {
        let (summary, agent) = {
            let mut registry = self.tasks.write().await;
            let task = registry
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| AutodevError::NotFound(format!("task '{task_id}'")))?;
            if task.state != TaskState::Pending {
                return Err(AutodevError::Validation(format!(
                    "task '{task_id}' is {} and cannot be executed",
                    task.state
                )));
            }
            task.state = TaskState::Running;
            task.started_at = Some(Utc::now());
            (task.summary(), task.assigned_agent.clone())
        };

        info!(task_id = %task_id, agent = %agent, "Executing task");
        self.bus
            .emit(
                event_types::TASK_STARTED,
                SOURCE,
                serde_json::json!({ "task_id": task_id }),
            )
            .await;
        self.monitor.start_task(&agent, task_id).await;

        let start = Instant::now();
        let capability = self.agents.read().await.get(&agent).cloned();
        let outcome = match capability {
            Some(capability) => capability.execute(summary).await.map_err(|e| e.to_string()),
            None => Err(AutodevError::NotFound(format!("agent '{agent}'")).to_string()),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                {
                    let mut registry = self.tasks.write().await;
                    if let Some(task) = registry.tasks.get_mut(task_id) {
                        task.result = Some(result.clone());
                        task.state = TaskState::Completed;
                        task.finished_at = Some(Utc::now());
                    }
                }
                self.monitor.finish_task(&agent, duration_ms).await;
                info!(task_id = %task_id, agent = %agent, duration_ms, "Task completed");
                self.bus
                    .emit(
                        event_types::TASK_COMPLETED,
                        SOURCE,
                        serde_json::json!({ "task_id": task_id, "result": result }),
                    )
                    .await;
                Ok(TaskState::Completed)
            }
            Err(reason) => {
                self.record_failure(task_id, &agent, reason, duration_ms).await;
                Ok(TaskState::Failed)
            }
        }
    }

    /// Mark a still-running task Failed. A task that already reached a
    /// terminal state keeps it and no event is published.
    async fn record_failure(&self, task_id: &str, agent: &str, reason: String, duration_ms: u64) {
        let failed = {
            let mut registry = self.tasks.write().await;
            match registry.tasks.get_mut(task_id) {
                Some(task) if !task.state.is_terminal() => {
                    task.state = TaskState::Failed;
                    task.error = Some(reason.clone());
                    task.finished_at = Some(Utc::now());
                    true
                }
                _ => false,
            }
        };
        if !failed {
            warn!(
                task_id = %task_id,
                agent = %agent,
                error = %reason,
                "Ignoring failure for finished task"
            );
            return;
        }
        self.monitor.record_error(agent, duration_ms).await;
        error!(task_id = %task_id, agent = %agent, error = %reason, "Task failed");
        self.bus
            .emit(
                event_types::TASK_FAILED,
                SOURCE,
                serde_json::json!({ "task_id": task_id, "error": reason }),
            )
            .await;
    }

    /// Execute every ready task in batches until nothing is Pending or Running.
    ///
    /// Each batch is spawned as one tokio task per ready task and joined
    /// before readiness is recomputed. The loop also returns when the
    /// remaining Pending tasks can never run (a dependency Failed) or when no
    /// task has finished within the configured stall timeout.
    pub async fn run_workflow_loop(&self) -> CoordinatorStatus {
        info!("Starting scheduler loop");
        let mut last_progress = Instant::now();

        loop {
            let (ready, pending, running) = {
                let registry = self.tasks.read().await;
                (
                    registry.ready(),
                    registry.count(TaskState::Pending),
                    registry.count(TaskState::Running),
                )
            };

            if pending == 0 && running == 0 {
                break;
            }

            if ready.is_empty() {
                if running == 0 {
                    warn!(pending, "Pending tasks are blocked by failed dependencies");
                    break;
                }
                if last_progress.elapsed() >= self.config.stall_timeout() {
                    warn!(pending, running, "Scheduler stalled waiting on running tasks");
                    break;
                }
                tokio::time::sleep(self.config.poll_interval()).await;
                continue;
            }

            info!(batch = ready.len(), pending, "Dispatching batch");
            let handles: Vec<(Task, JoinHandle<AutodevResult<TaskState>>)> = ready
                .into_iter()
                .map(|task| {
                    let this = self.clone();
                    let id = task.id.clone();
                    let handle = tokio::spawn(async move { this.execute_task(&id).await });
                    (task, handle)
                })
                .collect();

            for (task, handle) in handles {
                match handle.await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        warn!(task_id = %task.id, error = %e, "Task skipped by scheduler");
                    }
                    Err(e) => {
                        let reason = AutodevError::AgentExecution(format!("agent panicked: {e}"));
                        self.record_failure(&task.id, &task.assigned_agent, reason.to_string(), 0)
                            .await;
                    }
                }
            }
            last_progress = Instant::now();
        }

        let status = self.get_status().await;
        info!(
            total = status.total_tasks,
            completed = status.count(TaskState::Completed),
            failed = status.count(TaskState::Failed),
            pending = status.count(TaskState::Pending),
            "Scheduler loop finished"
        );
        status
    }

    /// Snapshot of one task, `None` when the id is unknown.
    pub async fn get_task_status(&self, task_id: &str) -> Option<Task> {
        self.tasks.read().await.tasks.get(task_id).cloned()
    }

    /// Counts per state plus every task.
    pub async fn get_status(&self) -> CoordinatorStatus {
        let registry = self.tasks.read().await;
        let mut state_breakdown = BTreeMap::new();
        for task in registry.tasks.values() {
            *state_breakdown.entry(task.state).or_insert(0) += 1;
        }
        CoordinatorStatus {
            total_tasks: registry.tasks.len(),
            state_breakdown,
            tasks: registry.tasks.clone(),
        }
    }

    /// All tasks in creation order.
    pub async fn all_tasks(&self) -> Vec<Task> {
        self.tasks.read().await.ordered().cloned().collect()
    }

    /// Drop every task record.
    pub async fn clear(&self) {
        let mut registry = self.tasks.write().await;
        let dropped = registry.tasks.len();
        registry.clear();
        info!(dropped, "Task registry cleared");
    }
}
