//! `autodev` command-line runner.

mod builtins;
mod config;

use autodev_core::EventBus;
use autodev_orchestrator::{
    Coordinator, TaskPersistence, WorkflowDefinition, WorkflowEngine, WorkflowStatus,
};
use autodev_state::{FileStateStore, MemoryStateStore, StateManager, StateStore};
use clap::{Parser, Subcommand};
use config::{AutodevConfig, LoggingConfig, StateBackend, StateConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "autodev", about = "AutoDev - multi-agent task orchestration")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "autodev.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow definition file and print the final record
    Run {
        /// Workflow definition (TOML)
        workflow: PathBuf,
        /// Workflow id (defaults to the file stem)
        #[arg(long)]
        id: Option<String>,
    },
    /// Parse and check a workflow definition file
    Validate {
        /// Workflow definition (TOML)
        workflow: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = AutodevConfig::load(&cli.config).await?;
    config.apply_env(|key| std::env::var(key).ok());
    config.orchestrator.validate()?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Run { workflow, id } => run(&config, &workflow, id).await,
        Commands::Validate { workflow } => {
            let definition = load_workflow(&workflow).await?;
            check_agents(&definition)?;
            let tasks: usize = definition.stages.iter().map(|s| s.tasks.len()).sum();
            println!(
                "{}: {} stages, {} tasks",
                workflow.display(),
                definition.stages.len(),
                tasks
            );
            Ok(())
        }
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(config: &AutodevConfig, path: &Path, id: Option<String>) -> anyhow::Result<()> {
    let definition = load_workflow(path).await?;
    check_agents(&definition)?;
    let workflow_id = id.unwrap_or_else(|| workflow_id_from_path(path));

    let state = Arc::new(build_state(&config.state).await?);
    let bus = Arc::new(EventBus::new());
    let coordinator = Coordinator::with_config(bus.clone(), config.orchestrator.clone());
    builtins::register_builtins(&coordinator).await;
    TaskPersistence::new(coordinator.clone(), state.clone()).attach(&bus);

    let engine = WorkflowEngine::new(state, bus)
        .with_executor(Arc::new(coordinator.clone()))
        .with_stage_pause(config.orchestrator.stage_pause());

    info!(workflow_id = %workflow_id, path = %path.display(), "Running workflow");
    engine.create_workflow(&workflow_id, definition).await?;
    let workflow = engine.execute_workflow(&workflow_id).await?;

    let report = serde_json::json!({
        "workflow": workflow,
        "tasks": coordinator.all_tasks().await,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    if workflow.status == WorkflowStatus::Failed {
        anyhow::bail!(
            "workflow '{}' failed: {}",
            workflow_id,
            workflow.error.unwrap_or_default()
        );
    }
    Ok(())
}

async fn load_workflow(path: &Path) -> anyhow::Result<WorkflowDefinition> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        anyhow::anyhow!("Failed to read workflow file '{}': {}", path.display(), e)
    })?;
    let definition: WorkflowDefinition = toml::from_str(&raw)?;
    definition.validate()?;
    Ok(definition)
}

/// Reject definitions that name agents this binary does not provide.
fn check_agents(definition: &WorkflowDefinition) -> anyhow::Result<()> {
    for (index, stage) in definition.stages.iter().enumerate() {
        for task in &stage.tasks {
            if !builtins::BUILTIN_AGENTS.contains(&task.agent.as_str()) {
                anyhow::bail!(
                    "stage '{}': task '{}' uses unknown agent '{}' (available: {})",
                    stage.display_name(index),
                    task.key,
                    task.agent,
                    builtins::BUILTIN_AGENTS.join(", ")
                );
            }
        }
    }
    Ok(())
}

fn workflow_id_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "workflow".to_string())
}

async fn build_state(config: &StateConfig) -> anyhow::Result<StateManager> {
    let store: Arc<dyn StateStore> = match config.backend {
        StateBackend::Memory => Arc::new(MemoryStateStore::new()),
        StateBackend::File => {
            info!(dir = %config.dir.display(), "Using file state store");
            Arc::new(FileStateStore::new(config.dir.clone()).await?)
        }
    };
    let mut manager = StateManager::with_store(store);
    if let Some(ttl) = config.ttl_secs {
        manager = manager.with_ttl(Duration::from_secs(ttl));
    }
    Ok(manager)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::parse_from(["autodev", "run", "flows/build.toml", "--id", "b-1"]);
        assert_eq!(cli.config, PathBuf::from("autodev.toml"));
        match cli.command {
            Commands::Run { workflow, id } => {
                assert_eq!(workflow, PathBuf::from("flows/build.toml"));
                assert_eq!(id.as_deref(), Some("b-1"));
            }
            Commands::Validate { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn test_workflow_id_from_path() {
        assert_eq!(workflow_id_from_path(Path::new("flows/release.toml")), "release");
        assert_eq!(workflow_id_from_path(Path::new("/")), "workflow");
    }

    #[test]
    fn test_check_agents_rejects_unknown() {
        let definition: WorkflowDefinition = toml::from_str(
            r#"
            [[stages]]
            name = "build"
            [[stages.tasks]]
            key = "api"
            title = "Build API"
            agent = "backend"
            "#,
        )
        .unwrap();
        let err = check_agents(&definition).unwrap_err().to_string();
        assert!(err.contains("backend"));
    }

    #[tokio::test]
    async fn test_load_workflow_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        tokio::fs::write(
            &path,
            "[[stages]]\n[[stages.tasks]]\nkey = \"a\"\ntitle = \"A\"\nagent = \"echo\"\ndepends_on = [\"b\"]\n",
        )
        .await
        .unwrap();
        assert!(load_workflow(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_run_executes_shell_and_echo_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.toml");
        tokio::fs::write(
            &path,
            r#"
            [[stages]]
            name = "prepare"
            [[stages.tasks]]
            key = "hello"
            title = "Say hello"
            agent = "echo"

            [[stages]]
            name = "build"
            [[stages.tasks]]
            key = "compile"
            title = "Compile"
            description = "echo compiled"
            agent = "shell"
            "#,
        )
        .await
        .unwrap();

        let mut config = AutodevConfig::default();
        config.orchestrator.stage_pause_ms = 0;
        config.state.backend = StateBackend::File;
        config.state.dir = dir.path().join("state");
        run(&config, &path, None).await.unwrap();

        let store = FileStateStore::new(dir.path().join("state")).await.unwrap();
        let persisted = store.get("workflow:demo").await.unwrap();
        assert_eq!(persisted["status"], "completed");
        assert_eq!(persisted["stages"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_run_reports_failed_workflow() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        tokio::fs::write(
            &path,
            "[[stages]]\n[[stages.tasks]]\nkey = \"x\"\ntitle = \"t\"\ndescription = \"exit 1\"\nagent = \"shell\"\n",
        )
        .await
        .unwrap();

        let mut config = AutodevConfig::default();
        config.orchestrator.stage_pause_ms = 0;
        let err = run(&config, &path, Some("wf-broken".to_string()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("wf-broken"));
    }
}
