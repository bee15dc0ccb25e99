//! Persistence layer for workflow, task, and agent snapshots.
//!
//! [`StateStore`] is the narrow key/value adapter the orchestrator consumes.
//! Every operation is best-effort: failures come back as `false` / `None`
//! instead of errors. [`StateManager`] sits on top, keeping a local snapshot
//! that stays authoritative whenever the backing store is unavailable.

/// Snapshot manager with local fallback.
pub mod manager;
/// Key/value store adapter and its memory and file implementations.
pub mod store;

pub use manager::StateManager;
pub use store::{FileStateStore, MemoryStateStore, StateStore};
