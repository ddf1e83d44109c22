//! End-of-run summary.

use std::fmt;
use std::time::Duration;

use crate::sink::WriterReport;
use crate::source::ReaderReport;
use crate::topology::TaskResult;

/// Why the pipeline cancelled its tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// SIGINT/SIGTERM or the injected signal stream.
    Signal,
    /// `max_duration_secs` elapsed.
    Timeout,
    /// `error_handling.max_failures` tasks failed.
    FailureThreshold,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::Signal => "shutdown signal",
            CancelReason::Timeout => "max duration exceeded",
            CancelReason::FailureThreshold => "failure threshold reached",
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one pipeline run. Task results are in completion order.
#[derive(Debug, Clone)]
pub struct PipelineSummary {
    pub readers: Vec<TaskResult<ReaderReport>>,
    pub writers: Vec<TaskResult<WriterReport>>,
    /// End-of-stream markers that reached their queue.
    pub markers_sent: usize,
    /// First trigger that cancelled tasks, if any.
    pub cancel_reason: Option<CancelReason>,
    pub elapsed: Duration,
}

impl PipelineSummary {
    pub fn records_enqueued(&self) -> u64 {
        self.readers
            .iter()
            .filter_map(|r| r.outcome.report())
            .map(|r| r.records_enqueued)
            .sum()
    }

    pub fn records_written(&self) -> u64 {
        self.writers
            .iter()
            .filter_map(|w| w.outcome.report())
            .map(|w| w.records_written)
            .sum()
    }

    pub fn records_skipped(&self) -> u64 {
        self.writers
            .iter()
            .filter_map(|w| w.outcome.report())
            .map(|w| w.records_skipped)
            .sum()
    }

    /// Readers and writers that failed or panicked.
    pub fn failures(&self) -> usize {
        self.readers.iter().filter(|r| r.outcome.is_failure()).count()
            + self.writers.iter().filter(|w| w.outcome.is_failure()).count()
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancel_reason.is_some()
            || self.readers.iter().any(|r| r.outcome.is_cancelled())
            || self.writers.iter().any(|w| w.outcome.is_cancelled())
    }

    pub fn reader(&self, name: &str) -> Option<&TaskResult<ReaderReport>> {
        self.readers.iter().find(|r| r.name == name)
    }

    pub fn writer(&self, name: &str) -> Option<&TaskResult<WriterReport>> {
        self.writers.iter().find(|w| w.name == name)
    }
}
