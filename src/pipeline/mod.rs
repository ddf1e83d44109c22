//! Pipeline orchestration.
//!
//! Wires sources, output queues and sinks into a fixed topology and runs it:
//!
//! - **Configuring**: every source and output is resolved to a declared
//!   stream and one queue is built per stream. Any wiring problem is a
//!   [`ConfigError`] and nothing is spawned.
//! - **Running**: readers, writers and the duration monitor are spawned.
//! - **Draining**: readers are awaited, then exactly one end-of-stream marker
//!   is enqueued per queue, then writers are awaited. The shutdown signal, the
//!   duration monitor and the failure threshold cancel readers throughout;
//!   writers always run to their marker unless a second signal forces them
//!   down.
//! - **Stopped**: the monitor is aborted and a [`PipelineSummary`] returned.

mod summary;
mod supervisor;

pub use summary::{CancelReason, PipelineSummary};

use futures::Stream;
use indexmap::{IndexMap, IndexSet};
use snafu::prelude::*;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::{Config, SourceConfig};
use crate::error::{
    ConfigError, ConfigSnafu, DuplicateOutputPathSnafu, HttpClientSnafu, PipelineError,
    StreamWithMultipleOutputsSnafu, StreamWithoutOutputSnafu, UnknownStreamSnafu,
};
use crate::queue::{QueueConsumer, QueueProducer, StreamId, output_queue};
use crate::signal::shutdown_signals;
use crate::sink::{SinkWriter, WriterReport};
use crate::source::{HttpPageFetcher, PageFetcher, ReaderOutcome, ReaderReport, SourceReader};
use crate::topology::{DurationMonitor, TaskKind, TaskOutcome, TaskRegistry, spawn_task};

use supervisor::Supervisor;

/// Lifecycle of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Configuring,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineState::Configuring => "configuring",
            PipelineState::Running => "running",
            PipelineState::Draining => "draining",
            PipelineState::Stopped => "stopped",
        })
    }
}

/// A configured topology ready to run.
pub struct Pipeline<F = HttpPageFetcher> {
    state: PipelineState,
    max_duration: Duration,
    max_failures: usize,
    readers: Vec<(SourceReader<F>, QueueProducer)>,
    writers: Vec<(SinkWriter, QueueConsumer)>,
    /// One producer per queue, held back for the end-of-stream marker.
    markers: Vec<QueueProducer>,
}

impl Pipeline<HttpPageFetcher> {
    /// Wire the configuration with HTTP sources sharing `client`.
    pub fn new(config: &Config, client: reqwest::Client) -> Result<Self, ConfigError> {
        Self::build(config, |name, source| {
            HttpPageFetcher::from_config(client.clone(), name, source)
        })
    }
}

impl<F: PageFetcher + 'static> Pipeline<F> {
    /// Wire the configuration, building each source's fetcher with
    /// `make_fetcher`.
    pub fn build<M>(config: &Config, mut make_fetcher: M) -> Result<Self, ConfigError>
    where
        M: FnMut(&str, &SourceConfig) -> Result<F, ConfigError>,
    {
        config.validate()?;
        info!(state = %PipelineState::Configuring, "Configuring pipeline");

        let declared: IndexSet<StreamId> = config.streams.iter().copied().collect();

        let mut outputs_by_stream: IndexMap<StreamId, Vec<&str>> =
            declared.iter().map(|stream| (*stream, Vec::new())).collect();
        for (name, output) in &config.outputs {
            let Some(names) = outputs_by_stream.get_mut(&output.stream) else {
                return UnknownStreamSnafu {
                    component: "output",
                    name,
                    stream: output.stream,
                }
                .fail();
            };
            names.push(name);
        }
        for (stream, names) in &outputs_by_stream {
            ensure!(
                !names.is_empty(),
                StreamWithoutOutputSnafu { stream: *stream }
            );
            ensure!(
                names.len() == 1,
                StreamWithMultipleOutputsSnafu {
                    stream: *stream,
                    outputs: names.iter().map(|n| n.to_string()).collect::<Vec<_>>(),
                }
            );
        }

        let mut paths: HashMap<&Path, &str> = HashMap::new();
        for (name, output) in &config.outputs {
            if let Some(first) = paths.insert(output.path.as_path(), name) {
                return DuplicateOutputPathSnafu {
                    first,
                    second: name,
                    path: &output.path,
                }
                .fail();
            }
        }

        let capacity = config.global.queue_capacity;
        let mut producers: IndexMap<StreamId, QueueProducer> = IndexMap::new();
        let mut writers = Vec::with_capacity(config.outputs.len());
        for (name, output) in &config.outputs {
            let (producer, consumer) = output_queue(output.stream, capacity);
            producers.insert(output.stream, producer);
            writers.push((SinkWriter::new(name, output), consumer));
        }

        let mut readers = Vec::with_capacity(config.sources.len());
        for (name, source) in &config.sources {
            let producer = producers
                .get(&source.stream)
                .context(UnknownStreamSnafu {
                    component: "source",
                    name,
                    stream: source.stream,
                })?
                .clone();
            let fetcher = make_fetcher(name, source)?;
            readers.push((
                SourceReader::new(name.clone(), fetcher, source, &config.global),
                producer,
            ));
        }

        Ok(Self {
            state: PipelineState::Configuring,
            max_duration: config.global.max_duration(),
            max_failures: config.error_handling.max_failures,
            readers,
            writers,
            markers: producers.into_values().collect(),
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Log the wiring without starting anything.
    pub fn log_topology(&self) {
        for (reader, producer) in &self.readers {
            info!(source = reader.name(), stream = %producer.stream(), "Source");
        }
        for (writer, consumer) in &self.writers {
            info!(
                output = writer.name(),
                stream = %consumer.stream(),
                path = %writer.path().display(),
                "Output"
            );
        }
        info!(
            streams = self.markers.len(),
            max_duration_secs = self.max_duration.as_secs(),
            "Topology"
        );
    }

    /// Run until completion, the duration limit or SIGINT/SIGTERM.
    pub async fn run(self) -> PipelineSummary {
        self.run_until(shutdown_signals()).await
    }

    /// Run until completion, the duration limit or `signals` yielding.
    ///
    /// The first item stops the readers and lets the writers drain; the
    /// second cancels the writers too.
    pub async fn run_until<S>(mut self, signals: S) -> PipelineSummary
    where
        S: Stream<Item = ()>,
    {
        let started = Instant::now();
        self.transition(PipelineState::Running);

        let mut registry = TaskRegistry::new();
        let mut readers = JoinSet::new();
        let mut writers = JoinSet::new();

        for (reader, producer) in self.readers.drain(..) {
            let control = registry.register(reader.name().to_string(), TaskKind::Reader);
            spawn_task(
                &mut readers,
                &control,
                run_reader(reader, producer, control.token()),
            );
        }
        for (writer, consumer) in self.writers.drain(..) {
            let control = registry.register(writer.name().to_string(), TaskKind::Writer);
            spawn_task(
                &mut writers,
                &control,
                run_writer(writer, consumer, control.token()),
            );
        }
        info!(
            readers = readers.len(),
            writers = writers.len(),
            "Spawned tasks"
        );

        let monitor = tokio::spawn(
            DurationMonitor::new(self.max_duration)
                .run(registry.of_kind(TaskKind::Reader))
                .instrument(info_span!("task", name = "monitor", kind = %TaskKind::Monitor)),
        );
        let mut supervisor = Supervisor::new(registry, signals, monitor, self.max_failures);

        self.transition(PipelineState::Draining);
        let reader_results = supervisor.join_all(&mut readers).await;
        info!("All readers stopped");

        let markers = std::mem::take(&mut self.markers);
        let sent = supervisor
            .watch(futures::future::join_all(markers.iter().map(send_marker)))
            .await;
        let markers_sent = sent.into_iter().filter(|ok| *ok).count();
        drop(markers);

        let writer_results = supervisor.join_all(&mut writers).await;
        info!("All writers stopped");

        let cancel_reason = supervisor.finish();
        self.transition(PipelineState::Stopped);

        let summary = PipelineSummary {
            readers: reader_results,
            writers: writer_results,
            markers_sent,
            cancel_reason,
            elapsed: started.elapsed(),
        };
        info!(
            records_enqueued = summary.records_enqueued(),
            records_written = summary.records_written(),
            records_skipped = summary.records_skipped(),
            failures = summary.failures(),
            markers_sent = summary.markers_sent,
            cancelled = ?summary.cancel_reason.map(|r| r.as_str()),
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Pipeline summary"
        );
        summary
    }

    fn transition(&mut self, next: PipelineState) {
        info!(from = %self.state, to = %next, "Pipeline state change");
        self.state = next;
    }
}

async fn run_reader<F: PageFetcher>(
    reader: SourceReader<F>,
    producer: QueueProducer,
    shutdown: CancellationToken,
) -> TaskOutcome<ReaderReport> {
    match reader.run(producer, shutdown).await {
        Ok(ReaderOutcome::Completed(report)) => TaskOutcome::Completed(report),
        Ok(ReaderOutcome::Cancelled(report)) => TaskOutcome::Cancelled(report),
        Err(e) => {
            error!(error = %e, "Reader failed");
            TaskOutcome::Failed(e.to_string())
        }
    }
}

async fn run_writer(
    writer: SinkWriter,
    consumer: QueueConsumer,
    shutdown: CancellationToken,
) -> TaskOutcome<WriterReport> {
    match writer.run(consumer, shutdown).await {
        Ok(report) if report.cancelled => TaskOutcome::Cancelled(report),
        Ok(report) => TaskOutcome::Completed(report),
        Err(e) => {
            error!(error = %e, "Writer failed");
            TaskOutcome::Failed(e.to_string())
        }
    }
}

async fn send_marker(producer: &QueueProducer) -> bool {
    match producer.put_end_of_stream().await {
        Ok(()) => {
            debug!(stream = %producer.stream(), "End-of-stream marker enqueued");
            true
        }
        // Only a writer that already exited drops its consumer.
        Err(e) => {
            warn!(error = %e, "End-of-stream marker not delivered");
            false
        }
    }
}

/// Load-and-run entry point: build the HTTP client, wire the pipeline and
/// run it until completion or SIGINT/SIGTERM.
pub async fn run_pipeline(config: Config) -> Result<PipelineSummary, PipelineError> {
    let client = config.http.build_client().context(HttpClientSnafu)?;
    let pipeline = Pipeline::new(&config, client).context(ConfigSnafu)?;
    Ok(pipeline.run().await)
}
