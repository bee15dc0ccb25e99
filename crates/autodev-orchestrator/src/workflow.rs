use crate::stage::{StageDefinition, StageExecutor};
use autodev_core::{event_types, AutodevError, AutodevResult, EventBus};
use autodev_state::StateManager;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

const SOURCE: &str = "workflow_engine";

/// Lifecycle state of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    /// Registered, not yet executed.
    Created,
    /// Stages are executing.
    Running,
    /// Every stage succeeded.
    Completed,
    /// A stage failed; later stages did not run.
    Failed,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Created => write!(f, "created"),
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Ordered list of stages making up a workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Optional human-readable name.
    #[serde(default)]
    pub name: Option<String>,
    /// Stages, executed in order.
    #[serde(default)]
    pub stages: Vec<StageDefinition>,
}

impl WorkflowDefinition {
    /// Unnamed definition with `stages`.
    pub fn new(stages: Vec<StageDefinition>) -> Self {
        Self { name: None, stages }
    }

    /// Validate every stage.
    pub fn validate(&self) -> AutodevResult<()> {
        for (index, stage) in self.stages.iter().enumerate() {
            stage.validate(index)?;
        }
        Ok(())
    }
}

/// Progress entry appended when a stage starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    /// Position in the definition.
    pub index: usize,
    /// Resolved display name.
    pub name: String,
    /// Ids of the tasks the stage created.
    pub task_ids: Vec<String>,
    /// When the stage started.
    pub started_at: DateTime<Utc>,
    /// When the stage finished, successfully or not.
    pub finished_at: Option<DateTime<Utc>>,
    /// Failure reason, if the stage failed.
    pub error: Option<String>,
}

/// A workflow and its execution progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Caller-supplied id.
    pub id: String,
    /// Stages as registered.
    pub definition: WorkflowDefinition,
    /// Lifecycle state.
    pub status: WorkflowStatus,
    /// Index of the stage running or last run; 0 before the first stage.
    pub current_stage: usize,
    /// One record per started stage.
    pub stages: Vec<StageRecord>,
    /// When the workflow was created.
    pub created_at: DateTime<Utc>,
    /// When execution began.
    pub started_at: Option<DateTime<Utc>>,
    /// Set only when Completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// Set only when Failed.
    pub error: Option<String>,
}

/// Sequences workflow stages in order, persisting snapshots and publishing
/// workflow-level events.
///
/// The in-memory map is the source of truth; the [`StateManager`] copy is a
/// mirror.
pub struct WorkflowEngine {
    workflows: RwLock<HashMap<String, Workflow>>,
    state: Arc<StateManager>,
    bus: Arc<EventBus>,
    executor: Option<Arc<dyn StageExecutor>>,
    stage_pause: Duration,
}

impl WorkflowEngine {
    /// Engine persisting to `state` and publishing on `bus`, with no executor.
    pub fn new(state: Arc<StateManager>, bus: Arc<EventBus>) -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
            state,
            bus,
            executor: None,
            stage_pause: Duration::from_millis(100),
        }
    }

    /// Run stage tasks through `executor` (usually a [`Coordinator`](crate::Coordinator)).
    pub fn with_executor(mut self, executor: Arc<dyn StageExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Pause between stages. Zero only yields to the runtime.
    pub fn with_stage_pause(mut self, pause: Duration) -> Self {
        self.stage_pause = pause;
        self
    }

    /// Register a workflow in the Created state, persist it and emit
    /// `workflow_created`.
    pub async fn create_workflow(
        &self,
        workflow_id: impl Into<String>,
        definition: WorkflowDefinition,
    ) -> AutodevResult<()> {
        let workflow_id = workflow_id.into();
        if workflow_id.trim().is_empty() {
            return Err(AutodevError::Validation(
                "workflow id cannot be empty".to_string(),
            ));
        }
        definition.validate()?;

        let workflow = Workflow {
            id: workflow_id.clone(),
            definition,
            status: WorkflowStatus::Created,
            current_stage: 0,
            stages: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        };

        {
            let mut workflows = self.workflows.write().await;
            if workflows.contains_key(&workflow_id) {
                return Err(AutodevError::Validation(format!(
                    "workflow '{workflow_id}' already exists"
                )));
            }
            workflows.insert(workflow_id.clone(), workflow.clone());
        }

        self.state.save_workflow(&workflow_id, &workflow).await?;
        info!(
            workflow_id = %workflow_id,
            stages = workflow.definition.stages.len(),
            "Workflow created"
        );
        self.bus
            .emit(
                event_types::WORKFLOW_CREATED,
                SOURCE,
                serde_json::json!({ "workflow_id": workflow_id }),
            )
            .await;
        Ok(())
    }

    /// Run every stage in order and return the final record.
    ///
    /// A stage failure is recorded on the workflow (status Failed) rather
    /// than returned. Errors are only `NotFound` for an unknown id and
    /// `Validation` for a workflow that already ran.
    pub async fn execute_workflow(&self, workflow_id: &str) -> AutodevResult<Workflow> {
        let definition = {
            let mut workflows = self.workflows.write().await;
            let workflow = workflows
                .get_mut(workflow_id)
                .ok_or_else(|| AutodevError::NotFound(format!("workflow '{workflow_id}'")))?;
            if workflow.status != WorkflowStatus::Created {
                return Err(AutodevError::Validation(format!(
                    "workflow '{workflow_id}' is {} and cannot be executed again",
                    workflow.status
                )));
            }
            workflow.status = WorkflowStatus::Running;
            workflow.started_at = Some(Utc::now());
            workflow.definition.clone()
        };

        info!(workflow_id = %workflow_id, "Workflow started");
        self.bus
            .emit(
                event_types::WORKFLOW_STARTED,
                SOURCE,
                serde_json::json!({ "workflow_id": workflow_id }),
            )
            .await;

        let mut failure: Option<AutodevError> = None;
        for (index, stage) in definition.stages.iter().enumerate() {
            let name = stage.display_name(index);
            self.update(workflow_id, |wf| {
                wf.current_stage = index;
                wf.stages.push(StageRecord {
                    index,
                    name: name.clone(),
                    task_ids: Vec::new(),
                    started_at: Utc::now(),
                    finished_at: None,
                    error: None,
                });
            })
            .await;

            let outcome = self.execute_stage(workflow_id, index, stage).await;
            let stage_error = outcome.as_ref().err().map(ToString::to_string);
            self.update(workflow_id, |wf| {
                if let Some(record) = wf.stages.last_mut() {
                    record.finished_at = Some(Utc::now());
                    record.error = stage_error;
                    if let Ok(ids) = &outcome {
                        record.task_ids.clone_from(ids);
                    }
                }
            })
            .await;

            if let Err(e) = outcome {
                failure = Some(e);
                break;
            }

            if self.stage_pause.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.stage_pause).await;
            }
        }

        let snapshot = match failure {
            None => {
                let snapshot = self
                    .update(workflow_id, |wf| {
                        wf.status = WorkflowStatus::Completed;
                        wf.completed_at = Some(Utc::now());
                    })
                    .await;
                info!(workflow_id = %workflow_id, "Workflow completed");
                self.bus
                    .emit(
                        event_types::WORKFLOW_COMPLETED,
                        SOURCE,
                        serde_json::json!({ "workflow_id": workflow_id }),
                    )
                    .await;
                snapshot
            }
            Some(e) => {
                let reason = e.to_string();
                let snapshot = self
                    .update(workflow_id, |wf| {
                        wf.status = WorkflowStatus::Failed;
                        wf.error = Some(reason.clone());
                    })
                    .await;
                error!(workflow_id = %workflow_id, error = %reason, "Workflow failed");
                self.bus
                    .emit(
                        event_types::WORKFLOW_FAILED,
                        SOURCE,
                        serde_json::json!({ "workflow_id": workflow_id, "error": reason }),
                    )
                    .await;
                snapshot
            }
        };

        let snapshot = snapshot
            .ok_or_else(|| AutodevError::NotFound(format!("workflow '{workflow_id}'")))?;
        if let Err(e) = self.state.save_workflow(workflow_id, &snapshot).await {
            warn!(workflow_id = %workflow_id, error = %e, "Failed to persist workflow");
        }
        Ok(snapshot)
    }

    async fn execute_stage(
        &self,
        workflow_id: &str,
        index: usize,
        stage: &StageDefinition,
    ) -> AutodevResult<Vec<String>> {
        let name = stage.display_name(index);
        info!(workflow_id = %workflow_id, stage = %name, index, "Executing stage");
        self.bus
            .emit(
                event_types::STAGE_STARTED,
                SOURCE,
                serde_json::json!({ "workflow_id": workflow_id, "stage": name, "index": index }),
            )
            .await;

        let task_ids = match &self.executor {
            Some(executor) => executor.execute_stage(workflow_id, index, stage).await?,
            None => Vec::new(),
        };

        self.bus
            .emit(
                event_types::STAGE_COMPLETED,
                SOURCE,
                serde_json::json!({
                    "workflow_id": workflow_id,
                    "stage": name,
                    "index": index,
                    "tasks": task_ids.len(),
                }),
            )
            .await;
        Ok(task_ids)
    }

    /// Apply `f` to the in-memory record and return the updated copy.
    async fn update<F>(&self, workflow_id: &str, f: F) -> Option<Workflow>
    where
        F: FnOnce(&mut Workflow),
    {
        let mut workflows = self.workflows.write().await;
        let workflow = workflows.get_mut(workflow_id)?;
        f(workflow);
        Some(workflow.clone())
    }

    /// Current in-memory record.
    pub async fn get_workflow_status(&self, workflow_id: &str) -> Option<Workflow> {
        self.workflows.read().await.get(workflow_id).cloned()
    }

    /// All workflows, oldest first.
    pub async fn list_workflows(&self) -> Vec<Workflow> {
        let mut all: Vec<Workflow> = self.workflows.read().await.values().cloned().collect();
        all.sort_by_key(|wf| wf.created_at);
        all
    }

    /// Read the mirrored snapshot from the state manager.
    pub async fn load_persisted(&self, workflow_id: &str) -> Option<Workflow> {
        let value = self.state.get_workflow(workflow_id).await?;
        match serde_json::from_value(value) {
            Ok(workflow) => Some(workflow),
            Err(e) => {
                warn!(workflow_id = %workflow_id, error = %e, "Persisted workflow is unreadable");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> WorkflowEngine {
        WorkflowEngine::new(Arc::new(StateManager::new()), Arc::new(EventBus::new()))
            .with_stage_pause(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_create_sets_initial_state() {
        let engine = engine();
        engine
            .create_workflow("wf-1", WorkflowDefinition::default())
            .await
            .unwrap();
        let wf = engine.get_workflow_status("wf-1").await.unwrap();
        assert_eq!(wf.status, WorkflowStatus::Created);
        assert_eq!(wf.current_stage, 0);
        assert!(wf.stages.is_empty());
        assert!(wf.started_at.is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_and_blank_id() {
        let engine = engine();
        engine
            .create_workflow("wf-1", WorkflowDefinition::default())
            .await
            .unwrap();
        assert!(engine
            .create_workflow("wf-1", WorkflowDefinition::default())
            .await
            .is_err());
        assert!(engine
            .create_workflow(" ", WorkflowDefinition::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_execute_unknown_workflow() {
        let engine = engine();
        let err = engine.execute_workflow("nope").await.unwrap_err();
        assert!(matches!(err, AutodevError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stages_without_executor_complete_in_order() {
        let engine = engine();
        let definition = WorkflowDefinition::new(vec![
            StageDefinition::new("plan"),
            StageDefinition::default(),
        ]);
        engine.create_workflow("wf-2", definition).await.unwrap();
        let wf = engine.execute_workflow("wf-2").await.unwrap();

        assert_eq!(wf.status, WorkflowStatus::Completed);
        assert_eq!(wf.current_stage, 1);
        let names: Vec<&str> = wf.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["plan", "Stage_1"]);
        assert!(wf.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_list_workflows_oldest_first() {
        let engine = engine();
        assert!(engine.list_workflows().await.is_empty());
        for id in ["wf-b", "wf-a", "wf-c"] {
            engine
                .create_workflow(id, WorkflowDefinition::default())
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        engine.execute_workflow("wf-a").await.unwrap();

        let listed = engine.list_workflows().await;
        let ids: Vec<&str> = listed.iter().map(|wf| wf.id.as_str()).collect();
        assert_eq!(ids, vec!["wf-b", "wf-a", "wf-c"]);
        assert_eq!(listed[1].status, WorkflowStatus::Completed);
        assert_eq!(listed[0].status, WorkflowStatus::Created);
    }

    #[tokio::test]
    async fn test_execute_twice_is_rejected() {
        let engine = engine();
        engine
            .create_workflow("wf-3", WorkflowDefinition::default())
            .await
            .unwrap();
        engine.execute_workflow("wf-3").await.unwrap();
        let err = engine.execute_workflow("wf-3").await.unwrap_err();
        assert!(matches!(err, AutodevError::Validation(_)));
    }

    #[tokio::test]
    async fn test_persisted_copy_matches_final_record() {
        let engine = engine();
        engine
            .create_workflow("wf-4", WorkflowDefinition::new(vec![StageDefinition::new("only")]))
            .await
            .unwrap();
        assert_eq!(
            engine.load_persisted("wf-4").await.unwrap().status,
            WorkflowStatus::Created
        );

        engine.execute_workflow("wf-4").await.unwrap();
        let persisted = engine.load_persisted("wf-4").await.unwrap();
        assert_eq!(persisted.status, WorkflowStatus::Completed);
        assert_eq!(persisted.stages.len(), 1);
    }
}
