//! Task topology primitives shared by the orchestrator.
//!
//! - `task`: named cancellable tasks and their registry
//! - `monitor`: the global duration watchdog

pub mod monitor;
pub mod task;

pub use monitor::DurationMonitor;
pub use task::{
    TaskControl, TaskKind, TaskOutcome, TaskRegistry, TaskResult, cancel_unfinished, spawn_task,
};
