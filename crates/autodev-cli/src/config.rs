use autodev_orchestrator::OrchestratorConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Contents of `autodev.toml`. Every section is optional.
#[derive(Debug, Default, Deserialize)]
pub struct AutodevConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackend,
    /// Directory for the file backend.
    #[serde(default = "default_state_dir")]
    pub dir: PathBuf,
    /// Expiry applied to every snapshot written to the store.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackend::default(),
            dir: default_state_dir(),
            ttl_secs: None,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_state_dir() -> PathBuf {
    PathBuf::from("./data/state")
}

impl AutodevConfig {
    /// Read `path`, falling back to defaults when the file does not exist.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(Self::default());
        }
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(raw)?;
        Ok(config)
    }

    /// Apply `AUTODEV_LOG_LEVEL` and `AUTODEV_DATA_DIR` from `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("AUTODEV_LOG_LEVEL").filter(|v| !v.trim().is_empty()) {
            self.logging.level = level;
        }
        if let Some(dir) = lookup("AUTODEV_DATA_DIR").filter(|v| !v.trim().is_empty()) {
            self.state.dir = PathBuf::from(dir);
        }
    }
}
