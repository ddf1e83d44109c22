//! Task wrapper for component execution.
//!
//! Every reader and writer runs as a named task with its own cancellation
//! token. The orchestrator keeps the [`TaskControl`]s in a [`TaskRegistry`]
//! so timeouts, signals and the failure threshold can cancel tasks by kind:
//! readers on the first trigger, writers only when shutdown is forced.

use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info_span, warn};

use crate::metrics::events::TaskStatus;

/// Role of a task in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Reader,
    Writer,
    Monitor,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Reader => "reader",
            TaskKind::Writer => "writer",
            TaskKind::Monitor => "monitor",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of a task, carrying the task's own report when it has one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome<R> {
    Completed(R),
    Cancelled(R),
    Failed(String),
    Panicked(String),
}

impl<R> TaskOutcome<R> {
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Completed(_) => TaskStatus::Completed,
            Self::Cancelled(_) => TaskStatus::Cancelled,
            Self::Failed(_) | Self::Panicked(_) => TaskStatus::Failed,
        }
    }

    /// Failed or panicked.
    pub fn is_failure(&self) -> bool {
        self.status() == TaskStatus::Failed
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    pub fn report(&self) -> Option<&R> {
        match self {
            Self::Completed(r) | Self::Cancelled(r) => Some(r),
            Self::Failed(_) | Self::Panicked(_) => None,
        }
    }
}

impl<R: fmt::Display> fmt::Display for TaskOutcome<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed(r) => write!(f, "completed ({r})"),
            Self::Cancelled(r) => write!(f, "cancelled ({r})"),
            Self::Failed(e) => write!(f, "failed: {e}"),
            Self::Panicked(msg) => write!(f, "panicked: {msg}"),
        }
    }
}

/// A finished task: who it was and how it ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult<R> {
    pub name: String,
    pub kind: TaskKind,
    pub outcome: TaskOutcome<R>,
}

/// Cancellation handle for one task.
///
/// Cheap to clone; every clone refers to the same task.
#[derive(Debug, Clone)]
pub struct TaskControl {
    name: Arc<str>,
    kind: TaskKind,
    token: CancellationToken,
    finished: Arc<AtomicBool>,
}

impl TaskControl {
    pub fn new(name: impl Into<Arc<str>>, kind: TaskKind) -> Self {
        Self {
            name: name.into(),
            kind,
            token: CancellationToken::new(),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Token the task itself races its suspension points against.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Request cancellation.
    ///
    /// Returns `false` without doing anything when the task has already
    /// finished or was already cancelled.
    pub fn cancel(&self) -> bool {
        if self.is_finished() || self.token.is_cancelled() {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }
}

/// Cancel every unfinished task in `controls`, in order.
///
/// Returns how many tasks were actually cancelled.
pub fn cancel_unfinished(controls: &[TaskControl], reason: &str) -> usize {
    let mut cancelled = 0;
    for (n, control) in controls.iter().enumerate() {
        if control.is_finished() || control.is_cancelled() {
            continue;
        }
        warn!(reason, "Cancelling task {}: {}", n + 1, control.name());
        if control.cancel() {
            cancelled += 1;
        }
    }
    cancelled
}

/// Every reader and writer of one pipeline run, in registration order.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    controls: Vec<TaskControl>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task and return its control.
    pub fn register(&mut self, name: impl Into<Arc<str>>, kind: TaskKind) -> TaskControl {
        let control = TaskControl::new(name, kind);
        self.controls.push(control.clone());
        control
    }

    pub fn controls(&self) -> &[TaskControl] {
        &self.controls
    }

    /// Controls of every task of `kind`, in registration order.
    pub fn of_kind(&self, kind: TaskKind) -> Vec<TaskControl> {
        self.controls
            .iter()
            .filter(|c| c.kind() == kind)
            .cloned()
            .collect()
    }

    /// Tasks that have not reached a terminal state yet.
    pub fn unfinished(&self) -> usize {
        self.controls.iter().filter(|c| !c.is_finished()).count()
    }

    /// Cancel every unfinished task. Idempotent.
    pub fn cancel_all(&self, reason: &str) -> usize {
        cancel_unfinished(&self.controls, reason)
    }

    /// Cancel every unfinished task of `kind`. Idempotent.
    pub fn cancel_kind(&self, kind: TaskKind, reason: &str) -> usize {
        cancel_unfinished(&self.of_kind(kind), reason)
    }
}

/// Spawn `future` onto `set` as the task behind `control`.
///
/// The task runs inside a `task` span carrying its name and kind. A panic is
/// caught and reported as [`TaskOutcome::Panicked`] so the result still
/// carries the task's name. The control is marked finished either way.
pub fn spawn_task<R, F>(set: &mut JoinSet<TaskResult<R>>, control: &TaskControl, future: F)
where
    R: Send + 'static,
    F: Future<Output = TaskOutcome<R>> + Send + 'static,
{
    let control = control.clone();
    let span = info_span!("task", name = %control.name(), kind = %control.kind());

    set.spawn(
        async move {
            let outcome = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(payload) => TaskOutcome::Panicked(panic_message(payload.as_ref())),
            };
            control.mark_finished();
            TaskResult {
                name: control.name().to_string(),
                kind: control.kind(),
                outcome,
            }
        }
        .instrument(span),
    );
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
