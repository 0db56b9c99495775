//! Client helper for reaching WebSocket targets through a `WsProxy` relay.
//!
//! The relay opens the outbound connection on the client's behalf, so a
//! client that cannot set handshake headers itself can still pass them:
//!
//! ```no_run
//! # async fn demo() -> Result<(), wsproxy::ClientError> {
//! use wsproxy::{ConnectOptions, Message, RelayHandler, WsProxy};
//!
//! struct Print;
//! impl RelayHandler for Print {
//!     fn on_message(&mut self, msg: Message) {
//!         println!("{msg}");
//!     }
//! }
//!
//! let proxy = WsProxy::new("http://localhost:3000")?;
//! let options = ConnectOptions::default().header("Authorization", "Bearer token");
//! let conn = proxy.connect("wss://echo.example/", &options, Print).await?;
//! conn.send(Message::text("ping")).await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod endpoint;
pub mod status;

pub use connection::{RelayConnection, RelayHandler};
pub use endpoint::{ConnectOptions, RelayEndpoint};
pub use status::StatusCheck;
pub use tokio_tungstenite::tungstenite::Message;
pub use tokio_tungstenite::tungstenite::protocol::CloseFrame;
pub use wsproxy_proto::close::RelayClose;

/// Errors returned by the client helper.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The relay address could not be turned into valid URLs.
    #[error("invalid relay endpoint {0}")]
    InvalidEndpoint(String),

    /// Opening the WebSocket to the relay failed.
    #[error("failed to connect to relay: {0}")]
    Connect(#[source] Box<tokio_tungstenite::tungstenite::Error>),

    /// The connection is no longer open.
    #[error("connection closed")]
    ConnectionClosed,

    /// Writing to the relay failed.
    #[error("failed to send to relay: {0}")]
    Send(#[source] Box<tokio_tungstenite::tungstenite::Error>),
}

/// A relay endpoint plus the HTTP client used for status checks.
#[derive(Debug, Clone)]
pub struct WsProxy {
    endpoint: RelayEndpoint,
    http: reqwest::Client,
}

impl WsProxy {
    /// Creates a helper for a relay given by base URL or project alias.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidEndpoint`] if the address does not
    /// resolve to valid URLs.
    pub fn new(url_or_project: &str) -> Result<Self, ClientError> {
        Ok(Self {
            endpoint: RelayEndpoint::parse(url_or_project)?,
            http: reqwest::Client::new(),
        })
    }

    /// The resolved relay endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &RelayEndpoint {
        &self.endpoint
    }

    /// Asks the relay for its status. Never fails; an unreachable relay is
    /// reported as [`StatusCheck::Offline`].
    pub async fn check_status(&self) -> StatusCheck {
        status::check_status_with(&self.http, &self.endpoint).await
    }

    /// Connects to `target` through the relay.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connect`] if the relay cannot be reached.
    pub async fn connect<H: RelayHandler>(
        &self,
        target: &str,
        options: &ConnectOptions,
        handler: H,
    ) -> Result<RelayConnection, ClientError> {
        RelayConnection::connect(&self.endpoint, target, options, handler).await
    }
}
