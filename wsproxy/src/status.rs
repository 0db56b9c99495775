//! Relay status checks.

use wsproxy_proto::status::StatusReport;

use crate::endpoint::RelayEndpoint;

/// Result of asking a relay for its status.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusCheck {
    /// The relay answered with a status document.
    Online {
        /// Sessions currently active on the relay.
        connections: u64,
        /// Relay uptime in seconds.
        uptime: f64,
        /// The full document as served.
        report: StatusReport,
    },
    /// The relay could not be reached or gave an unusable answer.
    Offline {
        /// What went wrong.
        error: String,
    },
}

impl StatusCheck {
    /// Whether the relay answered.
    #[must_use]
    pub const fn is_online(&self) -> bool {
        matches!(self, Self::Online { .. })
    }
}

/// Fetches `GET /status` from a relay with a fresh HTTP client.
pub async fn check_status(endpoint: &RelayEndpoint) -> StatusCheck {
    check_status_with(&reqwest::Client::new(), endpoint).await
}

/// Fetches `GET /status` from a relay using the given HTTP client.
pub async fn check_status_with(client: &reqwest::Client, endpoint: &RelayEndpoint) -> StatusCheck {
    let url = endpoint.status_url();
    let response = match client.get(url.clone()).send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(%url, error = %e, "status request failed");
            return StatusCheck::Offline {
                error: e.to_string(),
            };
        }
    };

    let status = response.status();
    if !status.is_success() {
        return StatusCheck::Offline {
            error: format!("Server responded with status {}", status.as_u16()),
        };
    }

    match response.json::<StatusReport>().await {
        Ok(report) => StatusCheck::Online {
            connections: report.connections,
            uptime: report.uptime,
            report,
        },
        Err(e) => StatusCheck::Offline {
            error: e.to_string(),
        },
    }
}
