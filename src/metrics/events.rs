//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the pipeline.
//! Events implement the `InternalEvent` trait which records the corresponding
//! metric through the `metrics` facade. Without an installed recorder the
//! calls are no-ops.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

use crate::queue::StreamId;

/// Histogram of page fetch latency. The exporter gives it fixed buckets.
pub const PAGE_FETCH_SECONDS: &str = "flurry_page_fetch_seconds";

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted after a page has been fetched and validated.
pub struct PageFetched {
    pub source: String,
    /// Time spent fetching, retries and backoff included.
    pub elapsed: Duration,
}

impl InternalEvent for PageFetched {
    fn emit(self) {
        trace!(source = %self.source, elapsed_ms = self.elapsed.as_millis() as u64, "Page fetched");
        histogram!(PAGE_FETCH_SECONDS, "source" => self.source.clone())
            .record(self.elapsed.as_secs_f64());
        counter!("flurry_pages_fetched_total", "source" => self.source).increment(1);
    }
}

/// Event emitted after a page's records have all been enqueued.
pub struct RecordsFetched {
    pub source: String,
    pub count: u64,
}

impl InternalEvent for RecordsFetched {
    fn emit(self) {
        trace!(source = %self.source, count = self.count, "Records fetched");
        counter!("flurry_records_fetched_total", "source" => self.source).increment(self.count);
    }
}

/// Event emitted before a failed operation is retried.
pub struct FetchRetried {
    pub operation: String,
}

impl InternalEvent for FetchRetried {
    fn emit(self) {
        trace!(operation = %self.operation, "Fetch retried");
        counter!("flurry_fetch_retries_total", "operation" => self.operation).increment(1);
    }
}

/// Current number of unconsumed entries in a queue.
pub struct QueueDepth {
    pub stream: StreamId,
    pub depth: usize,
}

impl InternalEvent for QueueDepth {
    fn emit(self) {
        gauge!("flurry_queue_depth", "stream" => self.stream.to_string()).set(self.depth as f64);
    }
}

/// Event emitted when a writer persists a record.
pub struct RecordsWritten {
    pub output: String,
    pub count: u64,
}

impl InternalEvent for RecordsWritten {
    fn emit(self) {
        trace!(output = %self.output, count = self.count, "Records written");
        counter!("flurry_records_written_total", "output" => self.output).increment(self.count);
    }
}

/// Event emitted when a writer drops a record it could not persist.
pub struct RecordSkipped {
    pub output: String,
}

impl InternalEvent for RecordSkipped {
    fn emit(self) {
        trace!(output = %self.output, "Record skipped");
        counter!("flurry_records_skipped_total", "output" => self.output).increment(1);
    }
}

/// How a task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Completed,
    Cancelled,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Failed => "failed",
        }
    }
}

/// Event emitted when a reader or writer task reaches a terminal state.
pub struct TaskFinished {
    pub kind: &'static str,
    pub status: TaskStatus,
}

impl InternalEvent for TaskFinished {
    fn emit(self) {
        trace!(kind = self.kind, status = self.status.as_str(), "Task finished");
        counter!(
            "flurry_tasks_finished_total",
            "kind" => self.kind,
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

/// Number of reader and writer tasks not yet finished.
pub struct ActiveTasks {
    pub count: usize,
}

impl InternalEvent for ActiveTasks {
    fn emit(self) {
        gauge!("flurry_active_tasks").set(self.count as f64);
    }
}
