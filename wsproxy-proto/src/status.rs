//! The JSON document served by the relay's status endpoint.

use serde::{Deserialize, Serialize};

/// Value of [`StatusReport::status`] for a healthy relay.
pub const STATUS_OK: &str = "ok";

/// Response body of `GET /status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Always `"ok"` when the relay answers at all.
    pub status: String,
    /// Number of sessions currently connecting or forwarding.
    pub connections: u64,
    /// Seconds since the relay process started.
    pub uptime: f64,
}

impl StatusReport {
    /// Build a healthy report.
    #[must_use]
    pub fn ok(connections: u64, uptime: f64) -> Self {
        Self {
            status: STATUS_OK.to_string(),
            connections,
            uptime,
        }
    }
}
