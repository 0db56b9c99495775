//! Session pair manager: one inbound client socket paired with one outbound
//! target socket.
//!
//! Lifecycle of a session:
//! 1. The upgraded client socket is admitted to the [`ConnectionRegistry`].
//! 2. The target is parsed from the upgrade parameters. Without a target URL
//!    the client is closed with 1008 and the admission is released.
//! 3. The outbound handshake runs. On failure the client is closed with 1011.
//! 4. Both directions are forwarded concurrently until either side ends.
//! 5. The session moves to [`SessionState::Closed`] (releasing its
//!    admission exactly once) and the surviving side is closed.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message as ClientMessage, Utf8Bytes, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{self, Message as TargetMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;
use wsproxy_proto::close::RelayClose;
use wsproxy_proto::params::{ConnectParams, TargetSpec};

use crate::frame::{self, Relayed};
use crate::registry::{ConnectionRegistry, SessionTicket};

/// An established outbound connection.
pub type TargetStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handshake headers owned by the WebSocket client itself. Client-supplied
/// values for these are ignored.
const RESERVED_HEADERS: [&str; 5] = [
    "connection",
    "upgrade",
    "sec-websocket-key",
    "sec-websocket-version",
    "sec-websocket-extensions",
];

/// Errors that can occur while opening the outbound connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The outbound request could not be built.
    #[error("invalid target request: {0}")]
    InvalidRequest(String),

    /// The target could not be reached or rejected the handshake.
    #[error("target handshake failed: {0}")]
    Handshake(#[source] Box<tungstenite::Error>),
}

impl ConnectError {
    /// Close reason reported to the client for this failure.
    #[must_use]
    pub const fn close_reason(&self) -> RelayClose {
        match self {
            Self::InvalidRequest(_) => RelayClose::TargetFailed,
            Self::Handshake(_) => RelayClose::TargetError,
        }
    }

    fn from_handshake(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Url(e) => Self::InvalidRequest(e.to_string()),
            other => Self::Handshake(Box::new(other)),
        }
    }
}

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Admitted; the outbound handshake has not completed.
    Connecting,
    /// Both sockets are open and frames flow both ways.
    Forwarding,
    /// Terminal. The registry admission has been released.
    Closed,
}

/// One relay session and its registry admission.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    target: TargetSpec,
    state: SessionState,
    ticket: SessionTicket,
}

impl Session {
    /// Creates a session in [`SessionState::Connecting`] from the upgrade
    /// parameters.
    ///
    /// A malformed `headers` parameter is logged and treated as absent.
    ///
    /// # Errors
    ///
    /// Returns [`RelayClose::TargetRequired`] when no target URL was given.
    /// The admission is released before returning, so a rejected connection
    /// leaves no lasting change in the registry.
    pub fn accept(ticket: SessionTicket, params: ConnectParams) -> Result<Self, RelayClose> {
        let id = Uuid::now_v7();
        let parsed = match TargetSpec::from_params(params) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(session_id = %id, error = %e, "rejecting connection");
                ticket.release();
                return Err(RelayClose::TargetRequired);
            }
        };

        if let Some(e) = parsed.header_error {
            tracing::warn!(session_id = %id, error = %e, "ignoring headers parameter");
        }

        Ok(Self {
            id,
            target: parsed.spec,
            state: SessionState::Connecting,
            ticket,
        })
    }

    /// Session identifier used in logs.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Where this session connects to.
    #[must_use]
    pub const fn target(&self) -> &TargetSpec {
        &self.target
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Moves `Connecting` → `Forwarding`. Returns `false` from any other
    /// state.
    #[must_use]
    pub fn mark_forwarding(&mut self) -> bool {
        if self.state != SessionState::Connecting {
            return false;
        }
        self.state = SessionState::Forwarding;
        true
    }

    /// Moves to `Closed` and releases the registry admission.
    ///
    /// Returns `true` only for the transition itself; later calls are no-ops.
    pub fn close(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        self.state = SessionState::Closed;
        self.ticket.release();
        true
    }
}

/// Builds the outbound handshake request for a target.
///
/// # Errors
///
/// Returns [`ConnectError::InvalidRequest`] if the URL does not parse or a
/// header name or value is not valid HTTP.
pub fn build_request(target: &TargetSpec) -> Result<Request, ConnectError> {
    let mut request = target
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| ConnectError::InvalidRequest(e.to_string()))?;

    let headers = request.headers_mut();
    for (name, value) in &target.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ConnectError::InvalidRequest(format!("header {name:?}: {e}")))?;
        if RESERVED_HEADERS.contains(&name.as_str()) {
            tracing::debug!(header = %name, "skipping reserved handshake header");
            continue;
        }
        let value = HeaderValue::from_str(value)
            .map_err(|e| ConnectError::InvalidRequest(format!("header {name}: {e}")))?;
        headers.insert(name, value);
    }

    if !target.protocols.is_empty() {
        let value = HeaderValue::from_str(&target.protocols.join(", "))
            .map_err(|e| ConnectError::InvalidRequest(format!("protocols: {e}")))?;
        headers.insert(SEC_WEBSOCKET_PROTOCOL, value);
    }

    Ok(request)
}

/// Opens the outbound connection to a target.
///
/// No timeout is applied; the handshake runs until it succeeds or the
/// transport reports a failure.
///
/// # Errors
///
/// Returns [`ConnectError`] if the request cannot be built or the
/// handshake fails.
pub async fn connect_target(target: &TargetSpec) -> Result<TargetStream, ConnectError> {
    let request = build_request(target)?;
    let (stream, response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(ConnectError::from_handshake)?;
    tracing::debug!(
        target_url = %target.url,
        status = %response.status(),
        protocol = ?response.headers().get(SEC_WEBSOCKET_PROTOCOL),
        "target handshake complete"
    );
    Ok(stream)
}

/// Why forwarding stopped. Produced by whichever direction ends first.
#[derive(Debug)]
enum Ending {
    /// The client sent a close frame or its stream ended.
    ClientClosed,
    /// Reading from or writing to the client failed.
    ClientFailed(String),
    /// The target sent a close frame or its stream ended.
    TargetClosed,
    /// Reading from or writing to the target failed.
    TargetFailed(String),
}

/// Runs a complete session over an upgraded client socket.
///
/// Never returns an error: every failure is reported to the client as a
/// close frame and to the log.
pub async fn run_session(
    socket: WebSocket,
    params: ConnectParams,
    registry: Arc<ConnectionRegistry>,
) {
    let ticket = registry.admit();
    let mut session = match Session::accept(ticket, params) {
        Ok(session) => session,
        Err(close) => {
            close_client(socket, Some(close)).await;
            return;
        }
    };

    let session_id = session.id();
    tracing::info!(%session_id, target_url = %session.target().url, "connecting to target");

    let mut target = match connect_target(session.target()).await {
        Ok(target) => target,
        Err(e) => {
            tracing::warn!(
                %session_id,
                target_url = %session.target().url,
                error = %e,
                "failed to create target connection"
            );
            session.close();
            close_client(socket, Some(e.close_reason())).await;
            return;
        }
    };

    if !session.mark_forwarding() {
        tracing::error!(
            %session_id,
            state = ?session.state(),
            "session left connecting state early"
        );
        session.close();
        close_sink(&mut target, TargetMessage::Close(None)).await;
        close_client(socket, Some(RelayClose::TargetError)).await;
        return;
    }
    tracing::info!(%session_id, target_url = %session.target().url, "connected to target");

    let (mut client_tx, mut client_rx) = socket.split();
    let (mut target_tx, mut target_rx) = target.split();

    let ending = tokio::select! {
        ending = client_to_target(&mut client_rx, &mut target_tx) => ending,
        ending = target_to_client(&mut target_rx, &mut client_tx) => ending,
    };

    session.close();

    match ending {
        Ending::ClientClosed => {
            tracing::info!(%session_id, "client disconnected");
            close_sink(&mut target_tx, TargetMessage::Close(None)).await;
            // Flushes the queued reply to the client's close frame.
            let _ = client_tx.close().await;
        }
        Ending::ClientFailed(error) => {
            tracing::debug!(%session_id, %error, "client connection failed");
            close_sink(&mut target_tx, TargetMessage::Close(None)).await;
        }
        Ending::TargetClosed => {
            tracing::info!(%session_id, "target disconnected");
            close_sink(&mut client_tx, ClientMessage::Close(None)).await;
            // Flushes the queued reply to the target's close frame.
            let _ = target_tx.close().await;
        }
        Ending::TargetFailed(error) => {
            tracing::warn!(%session_id, %error, "target connection error");
            let frame = close_frame(RelayClose::TargetError);
            close_sink(&mut client_tx, ClientMessage::Close(Some(frame))).await;
        }
    }
}

/// Forwards client frames to the target until either side ends.
async fn client_to_target<R, W>(client_rx: &mut R, target_tx: &mut W) -> Ending
where
    R: Stream<Item = Result<ClientMessage, axum::Error>> + Unpin,
    W: Sink<TargetMessage, Error = tungstenite::Error> + Unpin,
{
    while let Some(next) = client_rx.next().await {
        let msg = match next {
            Ok(msg) => msg,
            Err(e) => return Ending::ClientFailed(e.to_string()),
        };
        match frame::from_client(msg) {
            Relayed::Data(msg) => {
                if let Err(e) = target_tx.send(msg).await {
                    return Ending::TargetFailed(e.to_string());
                }
            }
            Relayed::Close => return Ending::ClientClosed,
            Relayed::Control => {}
        }
    }
    Ending::ClientClosed
}

/// Forwards target frames to the client until either side ends.
async fn target_to_client<R, W>(target_rx: &mut R, client_tx: &mut W) -> Ending
where
    R: Stream<Item = Result<TargetMessage, tungstenite::Error>> + Unpin,
    W: Sink<ClientMessage, Error = axum::Error> + Unpin,
{
    while let Some(next) = target_rx.next().await {
        let msg = match next {
            Ok(msg) => msg,
            Err(e) => return Ending::TargetFailed(e.to_string()),
        };
        match frame::from_target(msg) {
            Relayed::Data(msg) => {
                if let Err(e) = client_tx.send(msg).await {
                    return Ending::ClientFailed(e.to_string());
                }
            }
            Relayed::Close => return Ending::TargetClosed,
            Relayed::Control => {}
        }
    }
    Ending::TargetClosed
}

fn close_frame(close: RelayClose) -> CloseFrame {
    CloseFrame {
        code: close.code(),
        reason: Utf8Bytes::from_static(close.reason()),
    }
}

/// Closes a client socket that never reached forwarding.
async fn close_client(mut socket: WebSocket, close: Option<RelayClose>) {
    let frame = close.map(close_frame);
    if let Err(e) = socket.send(ClientMessage::Close(frame)).await {
        tracing::debug!(error = %e, "failed to send close frame to client");
    }
}

/// Sends a close frame on the surviving side, then flushes and closes it.
///
/// Errors are expected here (the peer may already be gone) and only logged.
async fn close_sink<W, M>(sink: &mut W, close: M)
where
    W: Sink<M> + Unpin,
    W::Error: std::fmt::Display,
{
    if let Err(e) = sink.send(close).await {
        tracing::debug!(error = %e, "close frame not delivered");
    }
    let _ = sink.close().await;
}
