use crate::types::DEFAULT_PRIORITY;
use autodev_core::{AutodevError, AutodevResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning knobs for the coordinator and workflow engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Sleep between readiness passes while tasks are still running elsewhere.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound on polling without any task finishing.
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,
    /// Pause between workflow stages. Zero yields to the runtime instead.
    #[serde(default = "default_stage_pause_ms")]
    pub stage_pause_ms: u64,
    /// Priority for tasks (direct or from a stage) created without one.
    #[serde(default = "default_priority")]
    pub default_priority: i32,
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_stall_timeout_secs() -> u64 {
    300
}

fn default_stage_pause_ms() -> u64 {
    100
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

impl OrchestratorConfig {
    /// `poll_interval_ms` as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// `stall_timeout_secs` as a `Duration`.
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    /// `stage_pause_ms` as a `Duration`.
    pub fn stage_pause(&self) -> Duration {
        Duration::from_millis(self.stage_pause_ms)
    }

    /// Reject values that would make the scheduler spin or never give up.
    pub fn validate(&self) -> AutodevResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(AutodevError::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.stall_timeout_secs == 0 {
            return Err(AutodevError::Config(
                "stall_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            stall_timeout_secs: default_stall_timeout_secs(),
            stage_pause_ms: default_stage_pause_ms(),
            default_priority: default_priority(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.stall_timeout(), Duration::from_secs(300));
        assert_eq!(config.default_priority, 2);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: OrchestratorConfig =
            serde_json::from_str(r#"{"stage_pause_ms": 0}"#).unwrap();
        assert_eq!(config.stage_pause(), Duration::ZERO);
        assert_eq!(config.poll_interval_ms, 100);
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        assert!(OrchestratorConfig::default().validate().is_ok());

        let spinning = OrchestratorConfig {
            poll_interval_ms: 0,
            ..OrchestratorConfig::default()
        };
        assert!(matches!(spinning.validate(), Err(AutodevError::Config(_))));

        let impatient = OrchestratorConfig {
            stall_timeout_secs: 0,
            ..OrchestratorConfig::default()
        };
        assert!(impatient.validate().is_err());
    }
}
