//! Relay metrics, exported in Prometheus format.
//!
//! Requests are counted per frame type and result code, deliveries per
//! envelope kind, and the router's occupancy is kept in gauges.

use crate::message::Envelope;
use crate::router::RouterStats;
use anyhow::{Context, Result};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tether_protocol::{code, FrameType};
use tracing::info;

const REQUESTS: &str = "tether_relay_requests_total";
const DELIVERIES: &str = "tether_relay_deliveries_total";
const DELIVERED_BYTES: &str = "tether_relay_delivered_bytes_total";
const CONNECTIONS: &str = "tether_relay_connections";
const SESSIONS: &str = "tether_relay_sessions";
const CHANNELS: &str = "tether_relay_channels";
const FRAME_ERRORS: &str = "tether_relay_frame_errors_total";

/// Register descriptions and start the exporter on `port`.
///
/// # Errors
///
/// Returns an error if the exporter cannot bind or a recorder is already
/// installed.
pub fn install(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    metrics::describe_counter!(REQUESTS, "Client requests by frame type and result code");
    metrics::describe_counter!(DELIVERIES, "Envelopes handed to connections, by kind");
    metrics::describe_counter!(DELIVERED_BYTES, "Payload bytes handed to connections");
    metrics::describe_gauge!(CONNECTIONS, "Open WebSocket connections");
    metrics::describe_gauge!(SESSIONS, "Logged-in users");
    metrics::describe_gauge!(CHANNELS, "Channels with at least one subscriber");
    metrics::describe_counter!(FRAME_ERRORS, "Frames dropped before routing, by reason");

    info!("Metrics exporter listening on {}", addr);
    Ok(())
}

/// Label for a request outcome. Failures keep their code so refusals can
/// be told apart.
fn outcome(result: u16) -> String {
    if result == code::OK {
        "ok".to_string()
    } else {
        result.to_string()
    }
}

/// Count one answered request.
pub fn request(op: FrameType, result: u16) {
    counter!(REQUESTS, "op" => format!("{op:?}"), "outcome" => outcome(result)).increment(1);
}

/// Count an envelope written to a connection.
pub fn delivered(envelope: &Envelope) {
    let kind = envelope.kind();
    counter!(DELIVERIES, "kind" => kind).increment(1);
    counter!(DELIVERED_BYTES, "kind" => kind).increment(envelope.payload_size() as u64);
}

/// Publish the router's channel and session counts.
pub fn occupancy(stats: &RouterStats) {
    gauge!(SESSIONS).set(stats.online_users as f64);
    gauge!(CHANNELS).set(stats.channel_count as f64);
}

/// Publish the open connection count.
pub fn connections(open: usize) {
    gauge!(CONNECTIONS).set(open as f64);
}

/// Count a frame dropped before it reached the router.
pub fn frame_error(reason: &'static str) {
    counter!(FRAME_ERRORS, "reason" => reason).increment(1);
}
