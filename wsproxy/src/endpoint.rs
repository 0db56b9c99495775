//! Relay endpoint resolution and relay URL construction.

use std::collections::BTreeMap;

use url::Url;
use wsproxy_proto::params::TargetSpec;

use crate::ClientError;

/// Hosting domain that bare project names resolve under.
pub const ALIAS_HOST_SUFFIX: &str = "glitch.me";

/// Options for the outbound connection the relay opens on our behalf.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Extra headers for the relay to send in the target handshake.
    pub headers: BTreeMap<String, String>,
    /// Sub-protocols for the relay to offer the target.
    pub protocols: Vec<String>,
}

impl ConnectOptions {
    /// Adds a handshake header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Adds a sub-protocol to offer.
    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }
}

/// Where a relay lives: its WebSocket base URL and its HTTP base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEndpoint {
    ws_base: Url,
    http_base: Url,
}

impl RelayEndpoint {
    /// Resolves a relay from either a base URL or a project alias.
    ///
    /// Anything containing `://` is a base URL; `http`/`https` and
    /// `ws`/`wss` are mapped onto each other so either form works. Anything
    /// else is a project name hosted at `<name>.glitch.me`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidEndpoint`] if the resulting URLs do not
    /// parse.
    pub fn parse(url_or_project: &str) -> Result<Self, ClientError> {
        let (ws_base, http_base) = if url_or_project.contains("://") {
            (
                swap_scheme(url_or_project, &[("http://", "ws://"), ("https://", "wss://")]),
                swap_scheme(url_or_project, &[("ws://", "http://"), ("wss://", "https://")]),
            )
        } else {
            (
                format!("wss://{url_or_project}.{ALIAS_HOST_SUFFIX}/"),
                format!("https://{url_or_project}.{ALIAS_HOST_SUFFIX}/"),
            )
        };

        Ok(Self {
            ws_base: parse_base(&ws_base)?,
            http_base: parse_base(&http_base)?,
        })
    }

    /// WebSocket base URL, always ending in `/`.
    #[must_use]
    pub const fn ws_base(&self) -> &Url {
        &self.ws_base
    }

    /// HTTP base URL, always ending in `/`.
    #[must_use]
    pub const fn http_base(&self) -> &Url {
        &self.http_base
    }

    /// Full relay URL for reaching `target` with the given options.
    #[must_use]
    pub fn connect_url(&self, target: &str, options: &ConnectOptions) -> Url {
        let spec = TargetSpec {
            url: target.to_string(),
            headers: options.headers.clone(),
            protocols: options.protocols.clone(),
        };
        let mut url = self.ws_base.clone();
        url.set_query(Some(&spec.to_params().to_query()));
        url
    }

    /// URL of the relay's status endpoint.
    #[must_use]
    pub fn status_url(&self) -> Url {
        let mut url = self.http_base.clone();
        let path = format!("{}status", url.path());
        url.set_path(&path);
        url
    }
}

fn swap_scheme(url: &str, mapping: &[(&str, &str)]) -> String {
    mapping
        .iter()
        .find_map(|(from, to)| url.strip_prefix(from).map(|rest| format!("{to}{rest}")))
        .unwrap_or_else(|| url.to_string())
}

fn parse_base(raw: &str) -> Result<Url, ClientError> {
    let with_slash = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&with_slash).map_err(|e| ClientError::InvalidEndpoint(format!("{raw}: {e}")))
}
