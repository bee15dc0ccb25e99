use crate::types::TaskSummary;
use async_trait::async_trait;
use autodev_core::AutodevResult;
use std::sync::Arc;

/// Executable behavior bound to an agent name.
///
/// Returning an error fails only the task being executed; the coordinator
/// records the error text on the task and never propagates it further.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Run `task` and return its result payload.
    async fn execute(&self, task: TaskSummary) -> AutodevResult<serde_json::Value>;
}

struct FnCapability<F>(F);

#[async_trait]
impl<F> Capability for FnCapability<F>
where
    F: Fn(TaskSummary) -> AutodevResult<serde_json::Value> + Send + Sync,
{
    async fn execute(&self, task: TaskSummary) -> AutodevResult<serde_json::Value> {
        (self.0)(task)
    }
}

/// Wrap a synchronous closure as a [`Capability`].
pub fn capability_fn<F>(f: F) -> Arc<dyn Capability>
where
    F: Fn(TaskSummary) -> AutodevResult<serde_json::Value> + Send + Sync + 'static,
{
    Arc::new(FnCapability(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use autodev_core::AutodevError;

    #[tokio::test]
    async fn test_capability_fn() {
        let echo = capability_fn(|task| Ok(serde_json::json!({ "echo": task.title })));
        let summary = TaskSummary {
            id: "t1".to_string(),
            title: "hello".to_string(),
            description: String::new(),
        };
        let result = echo.execute(summary.clone()).await.unwrap();
        assert_eq!(result["echo"], "hello");

        let broken = capability_fn(|_| Err(AutodevError::AgentExecution("nope".to_string())));
        assert!(broken.execute(summary).await.is_err());
    }
}
