//! Metrics collection and export for Murmur.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use murmur_protocol::FrameType;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "murmur_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "murmur_connections_active";
    pub const CONNECTIONS_REJECTED: &str = "murmur_connections_rejected_total";
    pub const FRAMES_TOTAL: &str = "murmur_frames_total";
    pub const FRAMES_BYTES: &str = "murmur_frames_bytes";
    pub const EVENTS_TOTAL: &str = "murmur_events_total";
    pub const ROUTER_ERRORS_TOTAL: &str = "murmur_router_errors_total";
    pub const USERS_ONLINE: &str = "murmur_users_online";
    pub const LATENCY_SECONDS: &str = "murmur_latency_seconds";
    pub const ERRORS_TOTAL: &str = "murmur_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_REJECTED,
        "Connections refused because the server was full"
    );
    metrics::describe_counter!(names::FRAMES_TOTAL, "Total number of frames processed");
    metrics::describe_counter!(names::FRAMES_BYTES, "Total bytes of frames processed");
    metrics::describe_counter!(
        names::EVENTS_TOTAL,
        "Client frames accepted, by frame type"
    );
    metrics::describe_counter!(
        names::ROUTER_ERRORS_TOTAL,
        "Chat events rejected by the router"
    );
    metrics::describe_gauge!(names::USERS_ONLINE, "Identities currently in the chat");
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Inbound frame processing latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of transport errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a connection refused at the limit.
pub fn record_rejected() {
    counter!(names::CONNECTIONS_REJECTED).increment(1);
}

/// Record a frame.
pub fn record_frame(bytes: usize, direction: &'static str) {
    counter!(names::FRAMES_TOTAL, "direction" => direction).increment(1);
    counter!(names::FRAMES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record an accepted client frame.
pub fn record_event(frame_type: FrameType) {
    counter!(names::EVENTS_TOTAL, "type" => frame_type.as_str()).increment(1);
}

/// Record a rejected chat event.
pub fn record_router_error(kind: &'static str) {
    counter!(names::ROUTER_ERRORS_TOTAL, "kind" => kind).increment(1);
}

/// Update the online user count.
pub fn set_users_online(count: usize) {
    gauge!(names::USERS_ONLINE).set(count as f64);
}

/// Record frame processing latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Record a transport error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_guard() {
        // No recorder installed; must not panic
        let _guard = ConnectionMetricsGuard::new();
        record_event(FrameType::Chat);
        record_router_error("protocol");
        set_users_online(3);
    }

    #[test]
    fn test_events_labelled_by_frame_type() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_event(FrameType::Ping);
            record_event(FrameType::Register);
            record_event(FrameType::Register);
        });

        let rendered = handle.render();
        assert!(rendered.contains(r#"murmur_events_total{type="ping"} 1"#));
        assert!(rendered.contains(r#"murmur_events_total{type="register"} 2"#));
    }
}
