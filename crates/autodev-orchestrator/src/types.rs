use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

/// Priority assigned to tasks that do not specify one.
pub const DEFAULT_PRIORITY: i32 = 2;

/// Lifecycle state of a task.
///
/// `Pending → Running → {Completed | Failed}`. There is no automatic retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Created, waiting for its dependencies or a scheduler pass.
    Pending,
    /// Claimed by an executor; the capability is running.
    Running,
    /// Finished successfully; `result` is set.
    Completed,
    /// Finished with an error; `error` is set.
    Failed,
}

impl TaskState {
    /// Completed and Failed are final.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Pending => write!(f, "pending"),
            TaskState::Running => write!(f, "running"),
            TaskState::Completed => write!(f, "completed"),
            TaskState::Failed => write!(f, "failed"),
        }
    }
}

/// A unit of schedulable work owned by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique id (UUID v4) assigned at creation.
    pub id: String,
    /// Short human-readable title.
    pub title: String,
    /// Free-form instructions for the agent.
    pub description: String,
    /// Name of the registered capability that executes this task.
    pub assigned_agent: String,
    /// Higher runs first among ready tasks.
    pub priority: i32,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Ids that must be Completed before this task is ready.
    pub dependencies: Vec<String>,
    /// Output payload, set only once Completed.
    pub result: Option<serde_json::Value>,
    /// Failure reason, set only once Failed.
    pub error: Option<String>,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task was claimed for execution.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached Completed or Failed.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Caller-supplied annotations (workflow id, stage name, ...).
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Task {
    /// Build a Pending task, using `default_priority` when the request has none.
    pub(crate) fn from_request(request: NewTask, default_priority: i32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: request.title,
            description: request.description,
            assigned_agent: request.agent,
            priority: request.priority.unwrap_or(default_priority),
            state: TaskState::Pending,
            dependencies: request.dependencies,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            metadata: request.metadata,
        }
    }

    /// Pending with every dependency in `completed_ids`.
    pub fn is_ready(&self, completed_ids: &HashSet<&str>) -> bool {
        self.state == TaskState::Pending
            && self
                .dependencies
                .iter()
                .all(|dep| completed_ids.contains(dep.as_str()))
    }

    /// The payload handed to the executing capability.
    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
        }
    }
}

/// What an agent capability sees of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    /// Task id.
    pub id: String,
    /// Task title.
    pub title: String,
    /// Task description.
    pub description: String,
}

/// Parameters for [`Coordinator::create_task`](crate::Coordinator::create_task).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    /// Required, non-blank.
    pub title: String,
    /// Instructions passed to the agent.
    #[serde(default)]
    pub description: String,
    /// Name of the capability to run; required, non-blank.
    pub agent: String,
    /// Scheduling priority. `None` takes the coordinator's
    /// [`default_priority`](crate::OrchestratorConfig::default_priority).
    #[serde(default)]
    pub priority: Option<i32>,
    /// Ids of existing tasks that must complete first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Annotations copied onto the task.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl NewTask {
    /// Request a task titled `title` for `agent`.
    pub fn new(title: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            agent: agent.into(),
            priority: None,
            dependencies: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set an explicit priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Replace the dependency list.
    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    /// Add one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Aggregate snapshot returned by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    /// Number of tasks in the registry.
    pub total_tasks: usize,
    /// Count per state; states with no tasks are absent.
    pub state_breakdown: BTreeMap<TaskState, usize>,
    /// Every task keyed by id.
    pub tasks: HashMap<String, Task>,
}

impl CoordinatorStatus {
    /// Tasks in `state`, zero when absent.
    pub fn count(&self, state: TaskState) -> usize {
        self.state_breakdown.get(&state).copied().unwrap_or(0)
    }
}

/// Per-agent execution counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// Tasks handed to the agent.
    pub tasks_started: u32,
    /// Tasks that finished successfully.
    pub tasks_completed: u32,
    /// Tasks that failed.
    pub tasks_failed: u32,
    /// Total execution time across finished tasks.
    pub duration_ms: u64,
}

/// Real-time snapshot of an agent worker's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    /// Agent name.
    pub agent: String,
    /// Task currently executing, if any.
    pub current_task: Option<String>,
    /// Current worker status.
    pub status: WorkerStatus,
    /// Lifetime counters.
    pub metrics: AgentMetrics,
}

/// Coarse status of an agent worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// No task running.
    Idle,
    /// Executing a task.
    Working,
    /// The last task failed.
    Error,
}
