//! Broker instrumentation.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! embedding binary installs a recorder.

use beacon_protocol::CommandKind;
use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "beacon_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "beacon_connections_active";
    pub const COMMANDS_TOTAL: &str = "beacon_commands_total";
    pub const PARSE_FAILURES_TOTAL: &str = "beacon_parse_failures_total";
    pub const PACKETS_DROPPED_TOTAL: &str = "beacon_packets_dropped_total";
    pub const FANOUT_SENDS_TOTAL: &str = "beacon_fanout_sends_total";
    pub const SEND_FAILURES_TOTAL: &str = "beacon_send_failures_total";
    pub const TOPICS_ACTIVE: &str = "beacon_topics_active";
}

pub(crate) fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

pub(crate) fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

pub(crate) fn record_command(kind: CommandKind) {
    counter!(names::COMMANDS_TOTAL, "command" => kind.keyword()).increment(1);
}

pub(crate) fn record_parse_failure() {
    counter!(names::PARSE_FAILURES_TOTAL).increment(1);
}

pub(crate) fn record_dropped_packet(reason: &'static str) {
    counter!(names::PACKETS_DROPPED_TOTAL, "reason" => reason).increment(1);
}

pub(crate) fn record_fanout(sends: usize, failures: usize) {
    counter!(names::FANOUT_SENDS_TOTAL).increment(sends as u64);
    if failures > 0 {
        counter!(names::SEND_FAILURES_TOTAL).increment(failures as u64);
    }
}

pub(crate) fn set_active_topics(count: usize) {
    gauge!(names::TOPICS_ACTIVE).set(count as f64);
}
