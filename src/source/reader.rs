//! Source reader: pages through a remote collection and feeds an output queue.

use indexmap::IndexMap;
use serde_json::Value;
use snafu::prelude::*;
use std::fmt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{PageFetcher, extract_records, tag_record};
use crate::config::{GlobalConfig, PacingConfig, SourceConfig};
use crate::emit;
use crate::error::{EnqueueSnafu, FetchSnafu, ReaderError};
use crate::metrics::events::{PageFetched, RecordsFetched};
use crate::queue::QueueProducer;
use crate::retry::{ExponentialBackoff, execute_with_retry};

/// What a reader got done before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderReport {
    pub pages_fetched: u32,
    pub records_enqueued: u64,
}

impl fmt::Display for ReaderReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pages, {} records",
            self.pages_fetched, self.records_enqueued
        )
    }
}

/// How a reader ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderOutcome {
    /// Every configured page was fetched and enqueued.
    Completed(ReaderReport),
    /// Cancellation was observed at a suspension point.
    Cancelled(ReaderReport),
}

/// Reads a fixed number of pages from one source into one queue.
pub struct SourceReader<F> {
    name: String,
    fetcher: F,
    pages: u32,
    start_page: u32,
    records_key: String,
    provenance_field: String,
    tags: IndexMap<String, Value>,
    max_attempts: u32,
    backoff: ExponentialBackoff,
    pacing: PacingConfig,
}

impl<F: PageFetcher> SourceReader<F> {
    pub fn new(
        name: impl Into<String>,
        fetcher: F,
        source: &SourceConfig,
        global: &GlobalConfig,
    ) -> Self {
        Self {
            name: name.into(),
            fetcher,
            pages: source.pages,
            start_page: source.start_page,
            records_key: source.records_key.clone(),
            provenance_field: source.provenance_field.clone(),
            tags: source.tags.clone(),
            max_attempts: global.max_retries,
            backoff: global.backoff,
            pacing: global.pacing,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch every page and enqueue its records.
    ///
    /// Fetches (including backoff sleeps), enqueues and pacing delays are all
    /// raced against `shutdown`. The end-of-stream marker is never sent from
    /// here.
    pub async fn run(
        self,
        queue: QueueProducer,
        shutdown: CancellationToken,
    ) -> Result<ReaderOutcome, ReaderError> {
        info!(
            pages = self.pages,
            stream = %queue.stream(),
            "Starting reader"
        );
        let mut report = ReaderReport::default();

        for offset in 0..self.pages {
            let page = self.start_page.saturating_add(offset);
            debug!(page, offset, pages = self.pages, "Fetching page");

            let started = Instant::now();
            let fetch = execute_with_retry(&self.name, self.max_attempts, &self.backoff, || {
                self.fetcher.fetch_page(page)
            });
            let Some(body) = shutdown.run_until_cancelled(fetch).await else {
                return Ok(self.cancelled(report, "fetch"));
            };
            let body = body.context(FetchSnafu { page })?;
            let records = extract_records(body, &self.records_key).context(FetchSnafu { page })?;

            let count = records.len();
            emit!(PageFetched {
                source: self.name.clone(),
                elapsed: started.elapsed(),
            });
            info!(page, records = count, "Fetched page");

            for mut record in records {
                tag_record(&mut record, &self.provenance_field, &self.name, &self.tags);
                let Some(result) = shutdown.run_until_cancelled(queue.put(record)).await else {
                    return Ok(self.cancelled(report, "enqueue"));
                };
                result.context(EnqueueSnafu)?;
                report.records_enqueued += 1;
            }
            report.pages_fetched += 1;
            emit!(RecordsFetched {
                source: self.name.clone(),
                count: count as u64,
            });

            if offset + 1 < self.pages {
                let delay = self.pacing.delay();
                debug!(delay_ms = delay.as_millis() as u64, "Pacing before next page");
                if shutdown
                    .run_until_cancelled(tokio::time::sleep(delay))
                    .await
                    .is_none()
                {
                    return Ok(self.cancelled(report, "pacing"));
                }
            }
        }

        info!(%report, "Reader finished");
        Ok(ReaderOutcome::Completed(report))
    }

    fn cancelled(&self, report: ReaderReport, stage: &'static str) -> ReaderOutcome {
        warn!(stage, %report, "Reader cancelled");
        ReaderOutcome::Cancelled(report)
    }
}
