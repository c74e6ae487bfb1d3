//! Metrics initialization for Prometheus exporter.
//!
//! Metric names used across the crate are collected here so dashboards and
//! code agree on them.

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;
use crate::error::Result;

/// Connections accepted by the listener.
pub const CONNECTIONS_ACCEPTED: &str = "bluegate_connections_accepted_total";
/// Requests answered with the blocked page.
pub const REQUESTS_BLOCKED: &str = "bluegate_requests_blocked_total";
/// Requests relayed to an upstream server.
pub const REQUESTS_FORWARDED: &str = "bluegate_requests_forwarded_total";
/// Requests abandoned because of an I/O or protocol failure.
pub const REQUEST_FAILURES: &str = "bluegate_request_failures_total";
/// Queued connections closed unserved at shutdown.
pub const CONNECTIONS_ABANDONED: &str = "bluegate_connections_abandoned_total";
/// Live worker threads.
pub const WORKERS: &str = "bluegate_workers";

/// Initialize the metrics system based on configuration.
///
/// When metrics are enabled, this starts an HTTP server that exposes
/// a `/metrics` endpoint for Prometheus to scrape.
///
/// When metrics are disabled, this is a no-op. The `metrics` crate
/// handles unregistered metrics gracefully (they become no-ops).
pub fn init(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen)
        .install()?;

    metrics::describe_counter!(CONNECTIONS_ACCEPTED, "Connections accepted by the listener");
    metrics::describe_counter!(REQUESTS_BLOCKED, "Requests answered with the blocked page");
    metrics::describe_counter!(REQUESTS_FORWARDED, "Requests relayed upstream");
    metrics::describe_counter!(REQUEST_FAILURES, "Requests abandoned after a failure");
    metrics::describe_counter!(
        CONNECTIONS_ABANDONED,
        "Queued connections closed unserved at shutdown"
    );
    metrics::describe_gauge!(WORKERS, "Live worker threads");

    Ok(())
}
