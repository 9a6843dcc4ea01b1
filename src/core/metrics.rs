// src/core/metrics.rs

//! Defines and registers Prometheus metrics for relay monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_gauge_vec,
};

lazy_static! {
    // --- Gauges ---
    /// The number of connections currently open, labeled by channel.
    pub static ref CONNECTED_PEERS: GaugeVec =
        register_gauge_vec!("relayd_connected_peers", "Number of currently open connections, labeled by channel.", &["channel"]).unwrap();
    /// Host-process connections that said hello and are waiting for a client.
    pub static ref WAITING_HOSTS: Gauge =
        register_gauge!("relayd_waiting_hosts", "Host-process connections waiting for a client.").unwrap();
    /// Live client/host-process pairings.
    pub static ref ACTIVE_ASSIGNMENTS: Gauge =
        register_gauge!("relayd_active_assignments", "Number of live client/host-process assignments.").unwrap();
    /// 1 while a command channel is connected.
    pub static ref COMMAND_CHANNEL_CONNECTED: Gauge =
        register_gauge!("relayd_command_channel_connected", "Command channel connected (1 for true, 0 for false).").unwrap();

    // --- Counters ---
    /// Connections accepted since startup, labeled by channel.
    pub static ref CONNECTIONS_RECEIVED_TOTAL: CounterVec =
        register_counter_vec!("relayd_connections_received_total", "Total number of connections accepted, labeled by channel.", &["channel"]).unwrap();
    /// Connections turned away because `max_connections` was reached.
    pub static ref CONNECTIONS_REJECTED_TOTAL: Counter =
        register_counter!("relayd_connections_rejected_total", "Total number of connections rejected at the connection limit.").unwrap();
    /// Clients paired with a host-process.
    pub static ref ASSIGNMENTS_TOTAL: Counter =
        register_counter!("relayd_assignments_total", "Total number of clients assigned to a host-process.").unwrap();
    /// Clients turned away, labeled by reason.
    pub static ref ASSIGNMENTS_DENIED_TOTAL: CounterVec =
        register_counter_vec!("relayd_assignments_denied_total", "Total number of clients denied an assignment, labeled by reason.", &["reason"]).unwrap();
    /// Bytes spliced between peers, labeled by direction.
    pub static ref BYTES_RELAYED_TOTAL: CounterVec =
        register_counter_vec!("relayd_bytes_relayed_total", "Total bytes forwarded between peers, labeled by direction.", &["direction"]).unwrap();
    /// Connections closed for framing or protocol errors.
    pub static ref PROTOCOL_ERRORS_TOTAL: Counter =
        register_counter!("relayd_protocol_errors_total", "Total number of connections closed for protocol errors.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
