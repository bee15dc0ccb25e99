use crate::coordinator::Coordinator;
use async_trait::async_trait;
use autodev_core::{
    event_types, AutodevError, AutodevResult, Event, EventBus, EventHandler, SubscriptionId,
};
use autodev_state::StateManager;
use std::sync::Arc;
use tracing::debug;

/// Event subscriber that mirrors task and agent snapshots into a
/// [`StateManager`] whenever a task changes state.
pub struct TaskPersistence {
    coordinator: Coordinator,
    state: Arc<StateManager>,
}

impl TaskPersistence {
    /// Read tasks from `coordinator` and write them to `state`.
    pub fn new(coordinator: Coordinator, state: Arc<StateManager>) -> Self {
        Self { coordinator, state }
    }

    /// Subscribe to every task lifecycle event on `bus`.
    pub fn attach(self, bus: &EventBus) -> Vec<SubscriptionId> {
        let handler: Arc<dyn EventHandler> = Arc::new(self);
        [
            event_types::TASK_STARTED,
            event_types::TASK_COMPLETED,
            event_types::TASK_FAILED,
        ]
        .into_iter()
        .map(|event_type| bus.subscribe(event_type, Arc::clone(&handler)))
        .collect()
    }
}

#[async_trait]
impl EventHandler for TaskPersistence {
    async fn handle(&self, event: &Event) -> AutodevResult<()> {
        let task_id = event.data_str("task_id").ok_or_else(|| {
            AutodevError::Validation(format!("{} event without task_id", event.event_type))
        })?;
        let task = self
            .coordinator
            .get_task_status(task_id)
            .await
            .ok_or_else(|| AutodevError::NotFound(format!("task '{task_id}'")))?;

        self.state.save_task(task_id, &task).await?;
        if let Some(agent) = self.coordinator.monitor().get_state(&task.assigned_agent).await {
            self.state.save_agent_state(&task.assigned_agent, &agent).await?;
        }
        debug!(task_id = %task_id, state = %task.state, "Task snapshot persisted");
        Ok(())
    }

    fn name(&self) -> &str {
        "task_persistence"
    }
}
