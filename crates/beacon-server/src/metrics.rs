//! Metrics export for Beacon.
//!
//! The broker records through the `metrics` facade; this module describes
//! those metrics and exports them in Prometheus format.

use beacon_core::telemetry::names;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of connected peers"
    );
    metrics::describe_counter!(names::COMMANDS_TOTAL, "Commands applied, by command");
    metrics::describe_counter!(
        names::PARSE_FAILURES_TOTAL,
        "Messages dropped because they could not be parsed"
    );
    metrics::describe_counter!(
        names::PACKETS_DROPPED_TOTAL,
        "Packets dropped before parsing, by reason"
    );
    metrics::describe_counter!(
        names::FANOUT_SENDS_TOTAL,
        "Sends attempted while fanning out publishes"
    );
    metrics::describe_counter!(
        names::SEND_FAILURES_TOTAL,
        "Fan-out sends the transport rejected"
    );
    metrics::describe_gauge!(names::TOPICS_ACTIVE, "Current number of known topics");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}
