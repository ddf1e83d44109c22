//! flurry: a bounded multi-source streaming ingestion pipeline.
//!
//! Readers page through remote HTTP collections and push records onto
//! capacity-bounded queues; one writer per queue drains it into a
//! newline-delimited JSON file. A duration watchdog, the shutdown signal and
//! a failure threshold stop the readers cooperatively; writers then drain to
//! their end-of-stream marker.
//!
//! # Example
//!
//! ```ignore
//! use flurry::{Config, run_pipeline};
//! use flurry::error::{ConfigSnafu, PipelineError};
//! use snafu::ResultExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), PipelineError> {
//!     let config = Config::from_file("config.yaml").context(ConfigSnafu)?;
//!     let summary = run_pipeline(config).await?;
//!     println!("Wrote {} records", summary.records_written());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod signal;
pub mod sink;
pub mod source;
pub mod topology;

// Re-export main types
pub use config::Config;
pub use pipeline::{CancelReason, Pipeline, PipelineState, PipelineSummary, run_pipeline};
pub use queue::{QueueEntry, StreamId};
pub use source::{PageFetcher, Record};
