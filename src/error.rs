//! Error types for flurry using snafu.
//!
//! Variant names are unique across the enums in this module so that the
//! generated context selectors never collide.

use snafu::prelude::*;
use std::path::PathBuf;
use std::time::Duration;

use crate::queue::StreamId;
use crate::retry::Retryable;

// ============ Config Errors ============

/// Errors that can occur during configuration loading, validation and wiring.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file {}: {source}", path.display()))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// No sources configured.
    #[snafu(display("At least one source must be configured"))]
    NoSources,

    /// No outputs configured.
    #[snafu(display("At least one output must be configured"))]
    NoOutputs,

    /// Source URL does not parse.
    #[snafu(display("Source '{source_name}' has invalid url '{url}': {message}"))]
    InvalidUrl {
        source_name: String,
        url: String,
        message: String,
    },

    /// A configured request header is not valid HTTP.
    #[snafu(display("Source '{source_name}' has invalid header '{header}'"))]
    InvalidHeader { source_name: String, header: String },

    /// Source would never fetch anything.
    #[snafu(display("Source '{source_name}' must fetch at least one page"))]
    ZeroPages { source_name: String },

    /// The last page number does not fit in a `u32`.
    #[snafu(display(
        "Source '{source_name}': start_page {start_page} with {pages} pages runs past the last page number"
    ))]
    PageRangeOverflow {
        source_name: String,
        start_page: u32,
        pages: u32,
    },

    /// Queue capacity must be positive.
    #[snafu(display("queue_capacity must be greater than zero"))]
    ZeroQueueCapacity,

    /// Queue capacity above the supported maximum.
    #[snafu(display("queue_capacity must be at most {max}, got {value}"))]
    QueueCapacityTooLarge { value: usize, max: usize },

    /// Retry count outside the accepted range.
    #[snafu(display("max_retries must be between 0 and {max}, got {value}"))]
    MaxRetriesOutOfRange { value: u32, max: u32 },

    /// Pipeline duration outside the accepted range.
    #[snafu(display("max_duration_secs must be between {min} and {max}, got {value}"))]
    MaxDurationOutOfRange { value: u64, min: u64, max: u64 },

    /// Lower bound above upper bound for a delay range.
    #[snafu(display("{setting}: min ({min_ms}ms) must not exceed max ({max_ms}ms)"))]
    InvalidDelayRange {
        setting: &'static str,
        min_ms: u64,
        max_ms: u64,
    },

    /// Backoff base below one would shrink delays.
    #[snafu(display("backoff.base must be at least 1, got {base}"))]
    InvalidBackoffBase { base: u32 },

    /// The same stream declared twice.
    #[snafu(display("Stream {stream} is declared more than once"))]
    DuplicateStream { stream: StreamId },

    /// A source or output refers to a stream that was never declared.
    #[snafu(display("{component} '{name}' references undeclared stream {stream}"))]
    UnknownStream {
        component: &'static str,
        name: String,
        stream: StreamId,
    },

    /// A declared stream has no writer draining it.
    #[snafu(display("Stream {stream} has no output"))]
    StreamWithoutOutput { stream: StreamId },

    /// A declared stream has more than one writer.
    #[snafu(display("Stream {stream} has multiple outputs: {}", outputs.join(", ")))]
    StreamWithMultipleOutputs {
        stream: StreamId,
        outputs: Vec<String>,
    },

    /// Two outputs would write to the same file.
    #[snafu(display("Outputs '{first}' and '{second}' share destination {}", path.display()))]
    DuplicateOutputPath {
        first: String,
        second: String,
        path: PathBuf,
    },
}

// ============ Fetch Errors ============

/// Errors that can occur while fetching a page from a remote source.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum FetchError {
    /// Transport-level failure (connect, timeout, TLS, body read).
    #[snafu(display("HTTP request failed: {source}"))]
    Http { source: reqwest::Error },

    /// Server answered with a non-success status.
    #[snafu(display("Unexpected HTTP status {status} from {url}"))]
    Status { status: u16, url: String },

    /// Server asked us to slow down.
    #[snafu(display("Rate limited (retry after {retry_after:?})"))]
    RateLimited { retry_after: Option<Duration> },

    /// Response body was not JSON.
    #[snafu(display("Failed to decode response body: {source}"))]
    Decode { source: reqwest::Error },

    /// Response was JSON but not shaped as a list of records under the expected key.
    #[snafu(display("Malformed response: expected a list of objects under '{key}', found {found}"))]
    MalformedResponse { key: String, found: &'static str },
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Http { .. } | FetchError::Status { .. } | FetchError::RateLimited { .. }
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

// ============ Queue Errors ============

/// Errors that can occur when enqueuing.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum QueueError {
    /// The consumer side of the queue has gone away.
    #[snafu(display("Queue for stream {stream} is closed"))]
    Closed { stream: StreamId },
}

// ============ Reader Errors ============

/// Errors that terminate a source reader.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ReaderError {
    /// Fetching a page failed after retries or without being retryable.
    #[snafu(display("Failed to fetch page {page}: {source}"))]
    Fetch { page: u32, source: FetchError },

    /// The writer for our stream stopped before we finished.
    #[snafu(display("Cannot enqueue record: {source}"))]
    Enqueue { source: QueueError },
}

// ============ Write Errors ============

/// Errors that can occur while writing to a sink destination.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WriteError {
    /// Destination could not be opened. Fatal for the writer.
    #[snafu(display("Failed to open destination {}: {source}", path.display()))]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A record could not be serialized. Skipped.
    #[snafu(display("Failed to serialize record: {source}"))]
    Serialize { source: serde_json::Error },

    /// A record could not be written. Skipped.
    #[snafu(display("Failed to write record: {source}"))]
    WriteRecord { source: std::io::Error },

    /// Buffered data could not be flushed on close.
    #[snafu(display("Failed to flush destination {}: {source}", path.display()))]
    Flush {
        path: PathBuf,
        source: std::io::Error,
    },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder: {source}"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ Pipeline Error (top-level) ============

/// Top-level errors that abort the process before or during startup.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Shared HTTP client could not be built.
    #[snafu(display("Failed to build HTTP client: {source}"))]
    HttpClient { source: reqwest::Error },

    /// Address parsing error.
    #[snafu(display("Failed to parse metrics address: {source}"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics error.
    #[snafu(display("Metrics error: {source}"))]
    Metrics { source: MetricsError },
}
