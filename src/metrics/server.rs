//! Prometheus metrics endpoint.
//!
//! Serves `/metrics` in the Prometheus text format and `/health` for liveness
//! checks. Only started when `metrics.enabled` is set; without it every
//! `emit!` is a no-op.

use axum::{Extension, Router, routing::get};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use snafu::prelude::*;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::events::PAGE_FETCH_SECONDS;
use crate::error::{MetricsError, PrometheusInitSnafu};

/// Bucket bounds for page fetch latency. Fetches that back off for the full
/// retry budget land in the upper buckets.
const FETCH_SECONDS_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Install the Prometheus recorder and serve it on `addr` in the background.
pub fn init(addr: SocketAddr) -> Result<(), MetricsError> {
    let handle = builder()?
        .install_recorder()
        .context(PrometheusInitSnafu)?;

    tokio::spawn(run_server(addr, handle));

    Ok(())
}

fn builder() -> Result<PrometheusBuilder, MetricsError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(PAGE_FETCH_SECONDS.to_string()),
            FETCH_SECONDS_BUCKETS,
        )
        .context(PrometheusInitSnafu)
}

fn router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(Extension(handle))
}

async fn run_server(addr: SocketAddr, handle: PrometheusHandle) {
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, error = %e, "Metrics server could not bind");
            return;
        }
    };
    info!(%addr, "Serving metrics");

    if let Err(e) = axum::serve(listener, router(handle)).await {
        error!(error = %e, "Metrics server stopped");
    }
}

async fn metrics_handler(Extension(handle): Extension<PrometheusHandle>) -> String {
    handle.render()
}

async fn health_handler() -> &'static str {
    "ok\n"
}
