//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by forwarding mode, status, and
//!   whether a route matched
//! - `proxy_request_duration_seconds` (histogram): latency by forwarding mode
//! - `proxy_forward_errors_total` (counter): failed sessions by error kind
//! - `proxy_active_sessions` (gauge): sessions currently in flight
//! - `proxy_websocket_sessions_total` (counter): completed WebSocket relays
//! - `proxy_route_reloads_total` (counter): snapshots published by the reloader
//! - `proxy_routes` (gauge): routes in the active snapshot
//! - `proxy_reload_failures_total` (counter): failed control plane polls
//!
//! Recording is a no-op until [`init_metrics`] installs a recorder.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(mode: &'static str, status: u16, matched: bool, started: Instant) {
    counter!(
        "proxy_requests_total",
        "mode" => mode,
        "status" => status.to_string(),
        "matched" => if matched { "true" } else { "false" }
    )
    .increment(1);
    histogram!("proxy_request_duration_seconds", "mode" => mode)
        .record(started.elapsed().as_secs_f64());
}

pub fn record_forward_error(kind: &'static str) {
    counter!("proxy_forward_errors_total", "kind" => kind).increment(1);
}

pub fn set_active_sessions(active: u64) {
    gauge!("proxy_active_sessions").set(active as f64);
}

pub fn record_websocket_session() {
    counter!("proxy_websocket_sessions_total").increment(1);
}

pub fn record_reload(routes: usize) {
    counter!("proxy_route_reloads_total").increment(1);
    gauge!("proxy_routes").set(routes as f64);
}

pub fn record_reload_failure() {
    counter!("proxy_reload_failures_total").increment(1);
}
