//! Configuration loading and validation.
//!
//! Configuration is a single YAML file. Environment placeholders are expanded
//! before parsing (see [`vars`]), then [`Config::validate`] checks ranges and
//! per-source settings. Stream wiring (every source and output pointing at a
//! declared stream) is checked when the pipeline is built.

mod vars;

pub use vars::{expand_env, expand_with};

use indexmap::IndexMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{
    ConfigError, DuplicateStreamSnafu, EnvInterpolationSnafu, InvalidBackoffBaseSnafu,
    InvalidDelayRangeSnafu, MaxDurationOutOfRangeSnafu, MaxRetriesOutOfRangeSnafu,
    NoOutputsSnafu, NoSourcesSnafu, PageRangeOverflowSnafu, QueueCapacityTooLargeSnafu,
    ReadFileSnafu, YamlParseSnafu, ZeroPagesSnafu, ZeroQueueCapacitySnafu,
};
use crate::queue::StreamId;
use crate::retry::ExponentialBackoff;

/// Upper bound for `global.queue_capacity`.
pub const MAX_QUEUE_CAPACITY: usize = 1_000_000;
/// Upper bound for `global.max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 20;
/// Accepted range for `global.max_duration_secs`.
pub const MIN_DURATION_SECS: u64 = 10;
pub const MAX_DURATION_SECS: u64 = 28_800;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub http: HttpConfig,
    /// Queues available to sources and outputs.
    pub streams: Vec<StreamId>,
    /// Named sources, started in declaration order.
    pub sources: IndexMap<String, SourceConfig>,
    /// Named outputs, one per stream.
    pub outputs: IndexMap<String, OutputConfig>,
    #[serde(default)]
    pub error_handling: ErrorHandlingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Pipeline-wide limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Capacity of every output queue (default: 1000).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Attempts per page fetch, 0 to 20 (default: 5). Zero still makes one call.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Wall-clock budget for the whole run, 10 to 28800 (default: 15).
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
    #[serde(default)]
    pub backoff: ExponentialBackoff,
    #[serde(default)]
    pub pacing: PacingConfig,
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_max_retries() -> u32 {
    5
}

fn default_max_duration_secs() -> u64 {
    15
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_retries: default_max_retries(),
            max_duration_secs: default_max_duration_secs(),
            backoff: ExponentialBackoff::default(),
            pacing: PacingConfig::default(),
        }
    }
}

impl GlobalConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }
}

/// Delay inserted between two page fetches of the same source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PacingConfig {
    #[serde(default = "default_pacing_min_ms")]
    pub min_ms: u64,
    #[serde(default = "default_pacing_max_ms")]
    pub max_ms: u64,
}

fn default_pacing_min_ms() -> u64 {
    5000
}

fn default_pacing_max_ms() -> u64 {
    11_000
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_ms: default_pacing_min_ms(),
            max_ms: default_pacing_max_ms(),
        }
    }
}

impl PacingConfig {
    /// Draw a delay uniformly from `[min_ms, max_ms]`.
    pub fn delay(&self) -> Duration {
        if self.max_ms <= self.min_ms {
            return Duration::from_millis(self.min_ms);
        }
        Duration::from_millis(rand::rng().random_range(self.min_ms..=self.max_ms))
    }
}

/// Settings for the shared HTTP client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Idle keep-alive connections kept per host (default: 8).
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_pool_max_idle_per_host() -> usize {
    8
}

fn default_user_agent() -> String {
    concat!("flurry/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            user_agent: default_user_agent(),
        }
    }
}

impl HttpConfig {
    /// Build the client shared by every HTTP source.
    pub fn build_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .timeout(Duration::from_secs(self.timeout_secs))
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .build()
    }
}

/// A paginated HTTP source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Endpoint of the collection.
    pub url: String,
    /// Queue this source feeds.
    pub stream: StreamId,
    /// Number of pages to fetch.
    pub pages: u32,
    /// Page number of the first request (default: 1).
    #[serde(default = "default_start_page")]
    pub start_page: u32,
    /// Query parameter carrying the page number (default: "page").
    #[serde(default = "default_page_param")]
    pub page_param: String,
    /// Response field holding the list of records (default: "data").
    #[serde(default = "default_records_key")]
    pub records_key: String,
    /// Field set to the source name on every record (default: "_source").
    #[serde(default = "default_provenance_field")]
    pub provenance_field: String,
    /// Extra request headers (API keys and the like).
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    /// Static fields merged into every record.
    #[serde(default)]
    pub tags: IndexMap<String, Value>,
}

fn default_start_page() -> u32 {
    1
}

fn default_page_param() -> String {
    "page".to_string()
}

fn default_records_key() -> String {
    "data".to_string()
}

fn default_provenance_field() -> String {
    "_source".to_string()
}

/// An NDJSON file output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Queue this output drains.
    pub stream: StreamId,
    /// Destination file.
    pub path: PathBuf,
    /// Append to an existing file instead of truncating it (default: false).
    #[serde(default)]
    pub append: bool,
}

/// Error handling configuration for resilient pipeline execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorHandlingConfig {
    /// Failed readers/writers tolerated before the whole pipeline is
    /// cancelled (0 = unlimited, default: 0).
    #[serde(default)]
    pub max_failures: usize,
}

/// Metrics configuration for the Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Whether to serve metrics (default: false).
    #[serde(default)]
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env(contents).map_err(|problems| {
            EnvInterpolationSnafu {
                message: problems.join("\n"),
            }
            .build()
        })?;

        let config: Config = serde_yaml::from_str(&expanded).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Check ranges and per-component settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let global = &self.global;
        ensure!(global.queue_capacity > 0, ZeroQueueCapacitySnafu);
        ensure!(
            global.queue_capacity <= MAX_QUEUE_CAPACITY,
            QueueCapacityTooLargeSnafu {
                value: global.queue_capacity,
                max: MAX_QUEUE_CAPACITY,
            }
        );
        ensure!(
            global.max_retries <= MAX_RETRIES_LIMIT,
            MaxRetriesOutOfRangeSnafu {
                value: global.max_retries,
                max: MAX_RETRIES_LIMIT,
            }
        );
        ensure!(
            (MIN_DURATION_SECS..=MAX_DURATION_SECS).contains(&global.max_duration_secs),
            MaxDurationOutOfRangeSnafu {
                value: global.max_duration_secs,
                min: MIN_DURATION_SECS,
                max: MAX_DURATION_SECS,
            }
        );
        ensure!(
            global.backoff.min_ms <= global.backoff.max_ms,
            InvalidDelayRangeSnafu {
                setting: "backoff",
                min_ms: global.backoff.min_ms,
                max_ms: global.backoff.max_ms,
            }
        );
        ensure!(
            global.backoff.base >= 1,
            InvalidBackoffBaseSnafu {
                base: global.backoff.base
            }
        );
        ensure!(
            global.pacing.min_ms <= global.pacing.max_ms,
            InvalidDelayRangeSnafu {
                setting: "pacing",
                min_ms: global.pacing.min_ms,
                max_ms: global.pacing.max_ms,
            }
        );

        let mut declared = HashSet::new();
        for stream in &self.streams {
            ensure!(
                declared.insert(*stream),
                DuplicateStreamSnafu { stream: *stream }
            );
        }

        ensure!(!self.sources.is_empty(), NoSourcesSnafu);
        ensure!(!self.outputs.is_empty(), NoOutputsSnafu);
        for (name, source) in &self.sources {
            ensure!(source.pages > 0, ZeroPagesSnafu { source_name: name });
            ensure!(
                source.start_page.checked_add(source.pages - 1).is_some(),
                PageRangeOverflowSnafu {
                    source_name: name,
                    start_page: source.start_page,
                    pages: source.pages,
                }
            );
        }

        Ok(())
    }
}
