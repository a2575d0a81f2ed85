//! Metrics collection and exposition.
//!
//! # Metrics
//! - `origin_responses_total` (counter): responses by domain and status code
//! - `origin_blacklist_rejections_total` (counter): rejections by scope and action
//! - `origin_pool_starvation_total` (counter): connection pool starvation alarms
//! - `origin_pool_allocated` (gauge): allocated connection slots
//! - `origin_accepted_connections_total` (counter): accepted sockets by listener
//! - `origin_statistics_failures_total` (counter): mutations that failed to persist
//!
//! Recording is a no-op until a recorder is installed, so library users and
//! tests pay nothing for these calls.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder with an HTTP scrape endpoint on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_response(domain: &str, code: u16) {
    metrics::counter!(
        "origin_responses_total",
        "domain" => domain.to_string(),
        "code" => code.to_string()
    )
    .increment(1);
}

pub fn record_blacklist_rejection(scope: &'static str, action: &'static str) {
    metrics::counter!(
        "origin_blacklist_rejections_total",
        "scope" => scope,
        "action" => action
    )
    .increment(1);
}

pub fn record_pool_starvation() {
    metrics::counter!("origin_pool_starvation_total").increment(1);
}

pub fn set_pool_allocated(allocated: usize) {
    metrics::gauge!("origin_pool_allocated").set(allocated as f64);
}

pub fn record_accepted(listener: &'static str) {
    metrics::counter!("origin_accepted_connections_total", "listener" => listener).increment(1);
}

pub fn record_statistics_failure() {
    metrics::counter!("origin_statistics_failures_total").increment(1);
}
