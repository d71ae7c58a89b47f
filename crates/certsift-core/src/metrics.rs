//! Prometheus metrics helpers for the certsift system.
//!
//! This module provides centralized metrics initialization and the metric
//! descriptions used across certsift components.
//!
//! # Metric Naming Conventions
//!
//! - Prefix: component name (`stream_`, `processor_`, `writer_`, `api_`)
//! - Suffix: unit or type (`_total`, `_seconds`)
//! - Labels: used sparingly to avoid cardinality explosion

use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

use crate::Result;

/// Initialize the Prometheus metrics recorder.
///
/// Must be called once at startup before any metrics are recorded. Returns
/// a handle for [`start_metrics_server`].
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_common_metrics();

    handle
}

/// Like [`init_metrics`] but returns `None` if a recorder is already
/// installed, instead of panicking. Useful for tests.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    PrometheusBuilder::new().install_recorder().ok()
}

/// Start the Prometheus metrics HTTP server.
///
/// Serves `GET /metrics` on the given port. Spawns a background task and
/// returns immediately.
pub async fn start_metrics_server(port: u16, handle: PrometheusHandle) -> Result<()> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server failed: {}", e);
        }
    });

    Ok(())
}

/// Register descriptions for the metrics recorded across certsift.
fn register_common_metrics() {
    describe_counter!(
        "stream_frames_total",
        "Raw frames received from the upstream websocket"
    );
    describe_counter!(
        "stream_reconnects_total",
        "Websocket reconnections (label: reason)"
    );
    describe_gauge!(
        "stream_connected",
        "Whether the upstream websocket is currently connected (1=yes, 0=no)"
    );

    describe_counter!(
        "processor_frames_skipped_total",
        "Frames dropped as malformed or incomplete (label: reason)"
    );
    describe_counter!(
        "processor_records_total",
        "CertRecords extracted from frames"
    );
    describe_counter!("processor_batches_total", "Record batches emitted");

    describe_counter!(
        "writer_rows_inserted_total",
        "Rows newly inserted into the domains table"
    );
    describe_counter!(
        "writer_batches_committed_total",
        "Batches committed to the store"
    );
    describe_counter!(
        "writer_batches_dropped_total",
        "Batches dropped after exhausting retries"
    );
    describe_counter!("writer_retries_total", "Batch transaction retries");

    describe_counter!(
        "api_requests_rate_limited_total",
        "Requests rejected by the per-IP rate limiter"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_init_metrics_is_idempotent() {
        let first = try_init_metrics();
        let second = try_init_metrics();
        // At most one install can succeed.
        assert!(first.is_none() || second.is_none());
    }
}
