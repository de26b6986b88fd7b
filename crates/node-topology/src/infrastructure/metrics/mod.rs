use std::fmt;

use chrono::Utc;
use influxdb_line_protocol::LineProtocolBuilder;

use crate::domain::topology::UpdateStats;

pub const UPDATE_STATS_MEASUREMENT: &str = "tsc_node_topology";
pub const UPDATER_COMPONENT: &str = "node-topology-updater";

// Wrapper struct for Vec<u8> that implements Display
pub struct BytesWrapper(Vec<u8>);

impl fmt::Display for BytesWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "{s}"),
            Err(_) => {
                tracing::error!(msg = "Failed to convert bytes to string");
                Err(fmt::Error)
            }
        }
    }
}

impl From<Vec<u8>> for BytesWrapper {
    fn from(bytes: Vec<u8>) -> Self {
        BytesWrapper(bytes)
    }
}

/// Current time in nanoseconds, the default line protocol precision.
pub fn current_time() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// Line protocol record of one reconciliation cycle.
pub fn encode_update_stats(stats: &UpdateStats, timestamp: i64) -> String {
    let lp = LineProtocolBuilder::new()
        .measurement(UPDATE_STATS_MEASUREMENT)
        .tag("component", UPDATER_COMPONENT)
        .field("updated", stats.updated as i64)
        .field("skipped", stats.skipped as i64)
        .field("errors", stats.errors as i64)
        .field("nodes", stats.nodes() as i64)
        .timestamp(timestamp)
        .close_line()
        .build();
    BytesWrapper::from(lp).to_string()
}

pub fn emit_update_stats(stats: &UpdateStats) {
    let lp_str = encode_update_stats(stats, current_time());
    tracing::info!(target: "metrics", msg = %lp_str);
}
