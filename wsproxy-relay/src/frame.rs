//! Conversion of data frames between the client socket and the target
//! socket.
//!
//! The two sides use different WebSocket stacks (axum on the inbound side,
//! tungstenite on the outbound side), so a frame has to be re-wrapped to
//! cross the relay. Payload bytes and the text/binary distinction are kept
//! exactly; control frames are not relayed.

use axum::extract::ws::Message as ClientMessage;
use tokio_tungstenite::tungstenite::Message as TargetMessage;

/// What the relay should do with a frame read from one side.
#[derive(Debug, PartialEq, Eq)]
pub enum Relayed<T> {
    /// A data frame to forward to the other side.
    Data(T),
    /// The sender closed its side of the session.
    Close,
    /// Ping, pong, or raw frame; answered by the transport, not relayed.
    Control,
}

/// Re-wraps a frame read from the client for sending to the target.
#[must_use]
pub fn from_client(msg: ClientMessage) -> Relayed<TargetMessage> {
    match msg {
        ClientMessage::Text(text) => Relayed::Data(TargetMessage::Text(text.as_str().into())),
        ClientMessage::Binary(data) => Relayed::Data(TargetMessage::Binary(data)),
        ClientMessage::Ping(_) | ClientMessage::Pong(_) => Relayed::Control,
        ClientMessage::Close(_) => Relayed::Close,
    }
}

/// Re-wraps a frame read from the target for sending to the client.
#[must_use]
pub fn from_target(msg: TargetMessage) -> Relayed<ClientMessage> {
    match msg {
        TargetMessage::Text(text) => Relayed::Data(ClientMessage::Text(text.as_str().into())),
        TargetMessage::Binary(data) => Relayed::Data(ClientMessage::Binary(data)),
        TargetMessage::Ping(_) | TargetMessage::Pong(_) | TargetMessage::Frame(_) => {
            Relayed::Control
        }
        TargetMessage::Close(_) => Relayed::Close,
    }
}
