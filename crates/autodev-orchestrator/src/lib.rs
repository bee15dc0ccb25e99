//! Dependency-aware task coordination and staged workflows for AutoDev agents.
//!
//! Tasks are created against named agents, become ready once all of their
//! dependencies complete, and run concurrently in batches. Workflows sequence
//! named stages, each of which may create and run a group of tasks.
//!
//! # Main types
//!
//! - [`Coordinator`]: Task registry and batch scheduler.
//! - [`Capability`]: Trait implemented by agents that execute tasks.
//! - [`WorkflowEngine`]: Runs workflow stages in order and tracks their status.
//! - [`StageExecutor`]: Extension point turning a stage into coordinator tasks.
//! - [`AgentMonitor`]: Per-agent state and execution metrics.
//! - [`TaskPersistence`]: Event subscriber mirroring task snapshots to the state store.

/// Agent capability trait.
pub mod capability;
/// Coordinator and tunables.
pub mod config;
/// Task registry and batch scheduler.
pub mod coordinator;
/// Agent health and metrics monitoring.
pub mod monitor;
/// Event-driven snapshot persistence.
pub mod persistence;
/// Workflow stage definitions and the stage executor seam.
pub mod stage;
/// Shared orchestration types (Task, TaskState, status snapshots).
pub mod types;
/// Workflow state machine.
pub mod workflow;

pub use capability::{capability_fn, Capability};
pub use config::OrchestratorConfig;
pub use coordinator::Coordinator;
pub use monitor::AgentMonitor;
pub use persistence::TaskPersistence;
pub use stage::{StageDefinition, StageExecutor, StageTask};
pub use types::{
    AgentMetrics, AgentState, CoordinatorStatus, NewTask, Task, TaskState, TaskSummary,
    WorkerStatus, DEFAULT_PRIORITY,
};
pub use workflow::{StageRecord, Workflow, WorkflowDefinition, WorkflowEngine, WorkflowStatus};
