//! Watches running tasks for the orchestrator.
//!
//! While the orchestrator waits on something (readers finishing, markers
//! being enqueued, writers finishing) the supervisor keeps listening for
//! shutdown signals, the duration monitor and the failure threshold.
//!
//! Every trigger stops the readers only. Writers keep draining until the
//! end-of-stream marker reaches them, so nothing already queued is lost. A
//! second shutdown signal cancels the writers as well.

use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use super::CancelReason;
use crate::emit;
use crate::metrics::events::{ActiveTasks, TaskFinished};
use crate::topology::{TaskKind, TaskOutcome, TaskRegistry, TaskResult};

pub(super) struct Supervisor<S> {
    registry: TaskRegistry,
    signals: Pin<Box<S>>,
    signals_seen: usize,
    signals_done: bool,
    monitor: JoinHandle<usize>,
    monitor_done: bool,
    max_failures: usize,
    failures: usize,
    cancel_reason: Option<CancelReason>,
}

impl<S: Stream<Item = ()>> Supervisor<S> {
    pub(super) fn new(
        registry: TaskRegistry,
        signals: S,
        monitor: JoinHandle<usize>,
        max_failures: usize,
    ) -> Self {
        Self {
            registry,
            signals: Box::pin(signals),
            signals_seen: 0,
            signals_done: false,
            monitor,
            monitor_done: false,
            max_failures,
            failures: 0,
            cancel_reason: None,
        }
    }

    /// Drive `fut` to completion while reacting to cancellation triggers.
    pub(super) async fn watch<T>(&mut self, fut: impl Future<Output = T>) -> T {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                out = &mut fut => return out,
                signal = self.signals.next(), if !self.signals_done => match signal {
                    Some(()) => self.on_signal(),
                    None => self.signals_done = true,
                },
                joined = &mut self.monitor, if !self.monitor_done => {
                    self.monitor_done = true;
                    match joined {
                        Ok(0) => {}
                        Ok(_) => {
                            self.cancel_reason.get_or_insert(CancelReason::Timeout);
                        }
                        Err(e) => error!(error = %e, "Duration monitor failed"),
                    }
                }
            }
        }
    }

    fn on_signal(&mut self) {
        self.signals_seen += 1;
        if self.signals_seen == 1 {
            self.stop_readers(CancelReason::Signal);
            info!("Writers will drain what is queued; signal again to stop them now");
        } else {
            self.cancel_reason.get_or_insert(CancelReason::Signal);
            let cancelled = self.registry.cancel_all("repeated shutdown signal");
            warn!(cancelled, "Repeated shutdown signal, cancelling all tasks");
        }
    }

    /// Wait for every task in `set`, recording each result as it arrives.
    pub(super) async fn join_all<R: Display>(
        &mut self,
        set: &mut JoinSet<TaskResult<R>>,
    ) -> Vec<TaskResult<R>>
    where
        R: Send + 'static,
    {
        let mut results = Vec::with_capacity(set.len());
        while let Some(joined) = self.watch(set.join_next()).await {
            match joined {
                Ok(result) => {
                    self.record(&result);
                    results.push(result);
                }
                Err(e) => {
                    error!(error = %e, "Task could not be joined");
                    self.count_failure();
                }
            }
        }
        results
    }

    fn record<R: Display>(&mut self, result: &TaskResult<R>) {
        emit!(TaskFinished {
            kind: result.kind.as_str(),
            status: result.outcome.status(),
        });
        emit!(ActiveTasks {
            count: self.registry.unfinished(),
        });

        match &result.outcome {
            TaskOutcome::Completed(_) => {
                info!(task = %result.name, outcome = %result.outcome, "Task finished");
            }
            TaskOutcome::Cancelled(_) => {
                warn!(task = %result.name, outcome = %result.outcome, "Task finished");
            }
            TaskOutcome::Failed(_) | TaskOutcome::Panicked(_) => {
                error!(task = %result.name, outcome = %result.outcome, "Task finished");
                self.count_failure();
            }
        }
    }

    fn count_failure(&mut self) {
        self.failures += 1;
        if self.max_failures > 0 && self.failures == self.max_failures {
            error!(
                failures = self.failures,
                max_failures = self.max_failures,
                "Failure threshold reached"
            );
            self.stop_readers(CancelReason::FailureThreshold);
        }
    }

    fn stop_readers(&mut self, reason: CancelReason) {
        self.cancel_reason.get_or_insert(reason);
        let cancelled = self.registry.cancel_kind(TaskKind::Reader, reason.as_str());
        warn!(%reason, cancelled, "Cancelling readers");
    }

    /// Stop the monitor and report the first cancellation trigger.
    pub(super) fn finish(self) -> Option<CancelReason> {
        self.monitor.abort();
        self.cancel_reason
    }
}
