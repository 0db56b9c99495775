//! Close codes and reasons the relay sends to its clients.
//!
//! Clients depend on these exact code/reason pairs to tell a relay-side
//! failure apart from a close initiated by the target.

/// RFC 6455 status code for a policy violation.
pub const POLICY_VIOLATION: u16 = 1008;

/// RFC 6455 status code for an unexpected server-side condition.
pub const INTERNAL_ERROR: u16 = 1011;

/// Reasons the relay closes an inbound connection on its own initiative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayClose {
    /// The upgrade request did not carry a target URL.
    TargetRequired,
    /// The outbound request could not be built (bad URL, bad header).
    TargetFailed,
    /// The outbound handshake failed, or the target errored mid-flight.
    TargetError,
}

impl RelayClose {
    /// WebSocket close code sent with this reason.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::TargetRequired => POLICY_VIOLATION,
            Self::TargetFailed | Self::TargetError => INTERNAL_ERROR,
        }
    }

    /// Human-readable close reason.
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::TargetRequired => "Target URL is required",
            Self::TargetFailed => "Failed to create target connection",
            Self::TargetError => "Target connection error",
        }
    }

    /// Classify a close frame received from the relay.
    ///
    /// Returns `None` for anything the relay did not originate itself,
    /// such as a normal close propagated from the target.
    #[must_use]
    pub fn from_code_reason(code: u16, reason: &str) -> Option<Self> {
        [Self::TargetRequired, Self::TargetFailed, Self::TargetError]
            .into_iter()
            .find(|c| c.code() == code && c.reason() == reason)
    }
}

impl std::fmt::Display for RelayClose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.reason(), self.code())
    }
}
