//! flurry: stream paginated HTTP sources into NDJSON files.

use clap::Parser;
use snafu::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use flurry::config::Config;
use flurry::error::{
    AddressParseSnafu, ConfigSnafu, HttpClientSnafu, MetricsSnafu, PipelineError,
};
use flurry::logging::init_tracing;
use flurry::{Pipeline, metrics};

/// Bounded multi-source streaming ingestion.
#[derive(Parser, Debug)]
#[command(name = "flurry")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Dry run - validate and wire the configuration without fetching anything.
    #[arg(long)]
    dry_run: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    info!("flurry starting");

    let config = Config::from_file(&args.config).context(ConfigSnafu)?;
    let client = config.http.build_client().context(HttpClientSnafu)?;
    let pipeline = Pipeline::new(&config, client).context(ConfigSnafu)?;

    if args.dry_run {
        info!("Dry run mode - configuration is valid");
        pipeline.log_topology();
        return Ok(());
    }

    if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        metrics::init(addr).context(MetricsSnafu)?;
        debug!(
            "Metrics endpoint listening on http://{}/metrics",
            config.metrics.address
        );
    }

    let summary = pipeline.run().await;

    if summary.was_cancelled() {
        warn!(
            reason = ?summary.cancel_reason.map(|r| r.as_str()),
            "Pipeline stopped early"
        );
    } else {
        info!("Pipeline completed");
    }
    info!("  Records enqueued: {}", summary.records_enqueued());
    info!("  Records written: {}", summary.records_written());
    info!("  Records skipped: {}", summary.records_skipped());
    info!("  Failed tasks: {}", summary.failures());

    Ok(())
}
