use crate::coordinator::Coordinator;
use crate::types::{NewTask, TaskState};
use async_trait::async_trait;
use autodev_core::{AutodevError, AutodevResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::info;

/// One named step of a workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Display name; defaults to `Stage_<index>`.
    #[serde(default)]
    pub name: Option<String>,
    /// Task templates created when the stage runs.
    #[serde(default)]
    pub tasks: Vec<StageTask>,
}

impl StageDefinition {
    /// Named stage with no tasks.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            tasks: Vec::new(),
        }
    }

    /// Append a task template.
    pub fn with_task(mut self, task: StageTask) -> Self {
        self.tasks.push(task);
        self
    }

    /// The configured name, or `Stage_<index>`.
    pub fn display_name(&self, index: usize) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("Stage_{index}"))
    }

    /// Check keys are unique and dependencies point at earlier tasks.
    pub fn validate(&self, index: usize) -> AutodevResult<()> {
        let stage = self.display_name(index);
        let mut seen: HashSet<&str> = HashSet::new();
        for task in &self.tasks {
            if task.key.trim().is_empty() {
                return Err(AutodevError::Validation(format!(
                    "stage '{stage}': task key cannot be empty"
                )));
            }
            if task.title.trim().is_empty() || task.agent.trim().is_empty() {
                return Err(AutodevError::Validation(format!(
                    "stage '{stage}': task '{}' needs a title and an agent",
                    task.key
                )));
            }
            for dep in &task.depends_on {
                if *dep == task.key {
                    return Err(AutodevError::Validation(format!(
                        "stage '{stage}': task '{}' cannot depend on itself",
                        task.key
                    )));
                }
                if !seen.contains(dep.as_str()) {
                    return Err(AutodevError::Validation(format!(
                        "stage '{stage}': task '{}' depends on '{dep}', which is not an earlier task",
                        task.key
                    )));
                }
            }
            if !seen.insert(task.key.as_str()) {
                return Err(AutodevError::Validation(format!(
                    "stage '{stage}': duplicate task key '{}'",
                    task.key
                )));
            }
        }
        Ok(())
    }
}

/// A task template inside a stage. `depends_on` names keys of earlier tasks
/// in the same stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTask {
    /// Identifier unique within the stage.
    pub key: String,
    /// Task title.
    pub title: String,
    /// Instructions for the agent.
    #[serde(default)]
    pub description: String,
    /// Agent that runs the task.
    pub agent: String,
    /// Explicit priority; otherwise the coordinator default.
    #[serde(default)]
    pub priority: Option<i32>,
    /// Keys of earlier tasks in this stage.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Extra metadata merged onto the created task.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl StageTask {
    /// Template with a key, title and agent.
    pub fn new(key: impl Into<String>, title: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            description: String::new(),
            agent: agent.into(),
            priority: None,
            depends_on: Vec::new(),
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

    /// Depend on the task with `key`.
    pub fn depends_on(mut self, key: impl Into<String>) -> Self {
        self.depends_on.push(key.into());
        self
    }
}

/// Extension point invoked by the workflow engine for every stage.
///
/// Returns the ids of the tasks the stage created. An error fails the
/// workflow and no later stage runs.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Run stage `index` of `workflow_id`.
    async fn execute_stage(
        &self,
        workflow_id: &str,
        index: usize,
        stage: &StageDefinition,
    ) -> AutodevResult<Vec<String>>;
}

/// Creates the stage's tasks, runs the scheduler until they settle, and fails
/// the stage if any of them Failed or is left blocked.
#[async_trait]
impl StageExecutor for Coordinator {
    async fn execute_stage(
        &self,
        workflow_id: &str,
        index: usize,
        stage: &StageDefinition,
    ) -> AutodevResult<Vec<String>> {
        stage.validate(index)?;
        let name = stage.display_name(index);

        let mut ids_by_key: HashMap<&str, String> = HashMap::new();
        let mut task_ids = Vec::with_capacity(stage.tasks.len());
        for template in &stage.tasks {
            let dependencies = template
                .depends_on
                .iter()
                .filter_map(|key| ids_by_key.get(key.as_str()).cloned())
                .collect();
            let mut request = NewTask::new(template.title.clone(), template.agent.clone())
                .with_description(template.description.clone())
                .with_dependencies(dependencies)
                .with_metadata("workflow_id", serde_json::json!(workflow_id))
                .with_metadata("stage", serde_json::json!(name))
                .with_metadata("key", serde_json::json!(template.key));
            request.priority = template.priority;
            request.metadata.extend(template.metadata.clone());

            let id = self.create_task(request).await?;
            ids_by_key.insert(template.key.as_str(), id.clone());
            task_ids.push(id);
        }

        if task_ids.is_empty() {
            return Ok(task_ids);
        }

        info!(
            workflow_id = %workflow_id,
            stage = %name,
            tasks = task_ids.len(),
            "Running stage tasks"
        );
        self.run_workflow_loop().await;

        for id in &task_ids {
            let Some(task) = self.get_task_status(id).await else {
                return Err(AutodevError::Stage(format!(
                    "stage '{name}': task '{id}' disappeared"
                )));
            };
            match task.state {
                TaskState::Completed => {}
                TaskState::Failed => {
                    return Err(AutodevError::Stage(format!(
                        "stage '{name}': task '{}' failed: {}",
                        task.title,
                        task.error.unwrap_or_default()
                    )));
                }
                TaskState::Pending | TaskState::Running => {
                    return Err(AutodevError::Stage(format!(
                        "stage '{name}': task '{}' did not finish ({})",
                        task.title, task.state
                    )));
                }
            }
        }
        Ok(task_ids)
    }
}
