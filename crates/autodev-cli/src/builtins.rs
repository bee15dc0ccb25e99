use async_trait::async_trait;
use autodev_core::{AutodevError, AutodevResult};
use autodev_orchestrator::{Capability, Coordinator, TaskSummary};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Agent names available to workflow files run from the command line.
pub const BUILTIN_AGENTS: &[&str] = &["echo", "shell"];

/// Register every built-in agent with `coordinator`.
pub async fn register_builtins(coordinator: &Coordinator) {
    coordinator.register_agent("echo", Arc::new(EchoAgent)).await;
    coordinator
        .register_agent("shell", Arc::new(ShellAgent::default()))
        .await;
}

/// Returns the task it was given.
pub struct EchoAgent;

#[async_trait]
impl Capability for EchoAgent {
    async fn execute(&self, task: TaskSummary) -> AutodevResult<serde_json::Value> {
        Ok(serde_json::json!({
            "task_id": task.id,
            "title": task.title,
            "description": task.description,
        }))
    }
}

/// Runs the task description (or the title, when the description is empty)
/// with `sh -c`. A non-zero exit fails the task.
pub struct ShellAgent {
    timeout: Duration,
}

impl ShellAgent {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ShellAgent {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[async_trait]
impl Capability for ShellAgent {
    async fn execute(&self, task: TaskSummary) -> AutodevResult<serde_json::Value> {
        let command = if task.description.trim().is_empty() {
            task.title.trim()
        } else {
            task.description.trim()
        };
        if command.is_empty() {
            return Err(AutodevError::AgentExecution("Empty command".to_string()));
        }

        let dangerous = ["rm -rf /", "mkfs", "dd if=", ":(){ :|:& };:"];
        if let Some(pattern) = dangerous.iter().find(|p| command.contains(*p)) {
            warn!(task_id = %task.id, command = %command, "Blocked dangerous command");
            return Err(AutodevError::AgentExecution(format!(
                "Command blocked: contains dangerous pattern '{pattern}'"
            )));
        }

        info!(task_id = %task.id, command = %command, "Executing shell command");
        let output = tokio::time::timeout(
            self.timeout,
            tokio::process::Command::new("sh")
                .arg("-c")
                .arg(command)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| {
            AutodevError::AgentExecution(format!(
                "Command timed out after {}s",
                self.timeout.as_secs_f64()
            ))
        })??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);

        if !output.status.success() {
            return Err(AutodevError::AgentExecution(format!(
                "exit code {exit_code}: {}",
                truncate_output(stderr.trim(), 2_000)
            )));
        }

        Ok(serde_json::json!({
            "exit_code": exit_code,
            "stdout": truncate_output(&stdout, 50_000),
            "stderr": truncate_output(&stderr, 10_000),
        }))
    }
}

fn truncate_output(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated, {} total bytes]", &s[..end], s.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(title: &str, description: &str) -> TaskSummary {
        TaskSummary {
            id: "t-1".to_string(),
            title: title.to_string(),
            description: description.to_string(),
        }
    }

    #[tokio::test]
    async fn test_echo_returns_task() {
        let result = EchoAgent.execute(summary("hello", "world")).await.unwrap();
        assert_eq!(result["task_id"], "t-1");
        assert_eq!(result["title"], "hello");
        assert_eq!(result["description"], "world");
    }

    #[tokio::test]
    async fn test_shell_runs_description() {
        let result = ShellAgent::default()
            .execute(summary("say hi", "echo hello"))
            .await
            .unwrap();
        assert_eq!(result["exit_code"], 0);
        assert!(result["stdout"].as_str().unwrap().contains("hello"));
    }

    #[tokio::test]
    async fn test_shell_falls_back_to_title() {
        let result = ShellAgent::default()
            .execute(summary("echo from-title", ""))
            .await
            .unwrap();
        assert!(result["stdout"].as_str().unwrap().contains("from-title"));
    }

    #[tokio::test]
    async fn test_shell_nonzero_exit_fails() {
        let err = ShellAgent::default()
            .execute(summary("fail", "echo oops >&2; exit 3"))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("exit code 3"));
        assert!(message.contains("oops"));
    }

    #[tokio::test]
    async fn test_shell_blocks_dangerous() {
        let err = ShellAgent::default()
            .execute(summary("wipe", "rm -rf /"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("blocked"));
    }

    #[tokio::test]
    async fn test_shell_timeout() {
        let err = ShellAgent::new(Duration::from_millis(200))
            .execute(summary("slow", "sleep 10"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "héllo";
        let cut = truncate_output(text, 2);
        assert!(cut.starts_with('h'));
        assert!(cut.contains("total bytes"));
        assert_eq!(truncate_output("short", 10), "short");
    }
}
