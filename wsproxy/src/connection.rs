//! A live connection to a target through the relay.
//!
//! Events are delivered to a [`RelayHandler`] from a background reader
//! task; writes go through [`RelayConnection::send`] and
//! [`RelayConnection::close`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::ClientError;
use crate::endpoint::{ConnectOptions, RelayEndpoint};

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Callbacks for connection events. Every method defaults to a no-op.
///
/// After `on_open`, callbacks run on the connection's reader task, one at a
/// time and in arrival order. `on_close` is always the last call.
pub trait RelayHandler: Send + 'static {
    /// The relay accepted the connection.
    fn on_open(&mut self) {}

    /// A text or binary frame arrived from the target.
    fn on_message(&mut self, _msg: Message) {}

    /// The connection closed. `frame` carries the code and reason, if any;
    /// see [`crate::RelayClose`] to recognise relay-side failures.
    fn on_close(&mut self, _frame: Option<CloseFrame>) {}

    /// A transport error occurred. Followed by `on_close` when it ends the
    /// connection.
    fn on_error(&mut self, _error: &tungstenite::Error) {}
}

/// An open connection through the relay.
///
/// Dropping it without calling [`RelayConnection::close`] drops the socket,
/// which the relay treats as a client disconnect.
pub struct RelayConnection {
    /// The relay URL this connection was opened with.
    url: Url,
    /// Write half of the WebSocket connection (shared for concurrent sends).
    ws_sender: Arc<Mutex<WsSender>>,
    /// Cleared by the reader task once the connection ends.
    open: Arc<AtomicBool>,
    /// Background reader task; aborted when the connection is dropped.
    reader_handle: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for RelayConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConnection")
            .field("url", &self.url.as_str())
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl RelayConnection {
    /// Opens a connection to `target` through the relay at `endpoint`.
    ///
    /// Calls `on_open` once the relay accepts the upgrade, then spawns a
    /// reader task that drives the remaining callbacks. A relay that rejects
    /// the target still accepts the upgrade first; the rejection arrives as
    /// an `on_close` with a [`crate::RelayClose`] code.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connect`] (after calling `on_error`) if the
    /// relay cannot be reached.
    pub async fn connect<H: RelayHandler>(
        endpoint: &RelayEndpoint,
        target: &str,
        options: &ConnectOptions,
        mut handler: H,
    ) -> Result<Self, ClientError> {
        let url = endpoint.connect_url(target, options);

        let ws_stream = match connect_async(url.as_str()).await {
            Ok((ws_stream, _response)) => ws_stream,
            Err(e) => {
                tracing::warn!(relay = %endpoint.ws_base(), err = %e, "relay connect failed");
                handler.on_error(&e);
                return Err(ClientError::Connect(Box::new(e)));
            }
        };

        tracing::info!(relay = %endpoint.ws_base(), target_url = target, "connected to proxy server");
        handler.on_open();

        let (ws_sender, ws_reader) = ws_stream.split();
        let open = Arc::new(AtomicBool::new(true));
        let reader_handle = tokio::spawn(reader_loop(ws_reader, handler, Arc::clone(&open)));

        Ok(Self {
            url,
            ws_sender: Arc::new(Mutex::new(ws_sender)),
            open,
            reader_handle,
        })
    }

    /// Sends a frame to the target.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionClosed`] if the connection has
    /// ended, or [`ClientError::Send`] if the write fails.
    pub async fn send(&self, msg: Message) -> Result<(), ClientError> {
        if !self.is_open() {
            return Err(ClientError::ConnectionClosed);
        }
        self.ws_sender
            .lock()
            .await
            .send(msg)
            .await
            .map_err(|e| ClientError::Send(Box::new(e)))
    }

    /// Starts a normal close. `on_close` fires once the relay answers.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Send`] if the close frame cannot be written.
    pub async fn close(&self) -> Result<(), ClientError> {
        match self.ws_sender.lock().await.send(Message::Close(None)).await {
            Ok(()) | Err(tungstenite::Error::AlreadyClosed | tungstenite::Error::ConnectionClosed) => {
                Ok(())
            }
            Err(e) => Err(ClientError::Send(Box::new(e))),
        }
    }

    /// Whether the connection is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// The relay URL, including the encoded target parameters.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

/// Background task: dispatches incoming frames to the handler until the
/// connection ends.
async fn reader_loop<H: RelayHandler>(mut reader: WsReader, mut handler: H, open: Arc<AtomicBool>) {
    while let Some(next) = reader.next().await {
        match next {
            Ok(msg @ (Message::Text(_) | Message::Binary(_))) => handler.on_message(msg),
            Ok(Message::Close(frame)) => {
                open.store(false, Ordering::Release);
                match &frame {
                    Some(f) => tracing::info!(
                        code = u16::from(f.code),
                        reason = f.reason.as_str(),
                        "disconnected from proxy server"
                    ),
                    None => tracing::info!("disconnected from proxy server"),
                }
                handler.on_close(frame);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                open.store(false, Ordering::Release);
                tracing::warn!(err = %e, "relay connection error");
                handler.on_error(&e);
                handler.on_close(None);
                return;
            }
        }
    }

    open.store(false, Ordering::Release);
    handler.on_close(None);
}
