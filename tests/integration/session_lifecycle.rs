// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::cast_possible_truncation
)]

//! Integration tests for relay session lifecycle.
//!
//! These tests validate:
//! - Frames are forwarded in order in both directions
//! - Handshake headers and sub-protocols reach the target
//! - A target-initiated close propagates to the client, and the relay
//!   completes the close handshake with the target
//! - Racing closes on both sides of many sessions decrement the
//!   connection count exactly once per session
//! - The count matches the number of live sessions under concurrent churn

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderMap;
use wsproxy_proto::params::{ConnectParams, TargetSpec};
use wsproxy_relay::relay::{self, RelayState};

type ClientWs =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type TargetWs = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

// =============================================================================
// Helpers
// =============================================================================

async fn start_relay() -> (std::net::SocketAddr, Arc<RelayState>) {
    let state = Arc::new(RelayState::new());
    let (addr, _handle) = relay::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    (addr, state)
}

/// A target that hands every accepted socket to the test, along with the
/// request headers it saw.
struct ScriptedTarget {
    url: String,
    accepted: mpsc::UnboundedReceiver<(TargetWs, HeaderMap)>,
}

impl ScriptedTarget {
    async fn start() -> Self {
        Self::start_with_protocol(None).await
    }

    /// Start a target that answers with the given sub-protocol.
    async fn start_with_protocol(protocol: Option<&'static str>) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/", listener.local_addr().unwrap());
        let (tx, accepted) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let seen = Arc::new(Mutex::new(HeaderMap::new()));
                    let seen_cb = Arc::clone(&seen);
                    let callback = move |req: &Request,
                                         mut response: Response|
                          -> Result<Response, ErrorResponse> {
                        *seen_cb.lock() = req.headers().clone();
                        if let Some(p) = protocol {
                            response
                                .headers_mut()
                                .insert("sec-websocket-protocol", p.parse().unwrap());
                        }
                        Ok(response)
                    };
                    if let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await {
                        let headers = seen.lock().clone();
                        let _ = tx.send((ws, headers));
                    }
                });
            }
        });

        Self { url, accepted }
    }

    async fn next(&mut self) -> (TargetWs, HeaderMap) {
        tokio::time::timeout(Duration::from_secs(5), self.accepted.recv())
            .await
            .expect("target was never dialed")
            .unwrap()
    }
}

async fn connect(relay: std::net::SocketAddr, target: &TargetSpec) -> ClientWs {
    let url = format!("ws://{relay}/?{}", target.to_params().to_query());
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

/// Read the next data frame, skipping control frames.
async fn next_data<S>(ws: &mut S) -> Message
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("stream error");
        if msg.is_text() || msg.is_binary() || msg.is_close() {
            return msg;
        }
    }
}

async fn wait_for_connections(state: &RelayState, expected: u64) {
    for _ in 0..500 {
        if state.registry.snapshot() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "connection count stuck at {}, expected {expected}",
        state.registry.snapshot()
    );
}

// =============================================================================
// Forwarding
// =============================================================================

#[tokio::test]
async fn frames_keep_order_in_both_directions() {
    let (relay, _state) = start_relay().await;
    let mut target = ScriptedTarget::start().await;

    let mut client = connect(relay, &TargetSpec::new(&target.url)).await;
    let (mut target_ws, _) = target.next().await;

    for i in 0..100u32 {
        let msg = if i % 2 == 0 {
            Message::Text(format!("up-{i}").into())
        } else {
            Message::Binary(i.to_be_bytes().to_vec().into())
        };
        client.send(msg).await.unwrap();
        target_ws
            .send(Message::Text(format!("down-{i}").into()))
            .await
            .unwrap();
    }

    for i in 0..100u32 {
        let expected = if i % 2 == 0 {
            Message::Text(format!("up-{i}").into())
        } else {
            Message::Binary(i.to_be_bytes().to_vec().into())
        };
        assert_eq!(next_data(&mut target_ws).await, expected);
    }
    for i in 0..100u32 {
        assert_eq!(
            next_data(&mut client).await,
            Message::Text(format!("down-{i}").into())
        );
    }
}

#[tokio::test]
async fn headers_and_protocols_reach_target() {
    let (relay, _state) = start_relay().await;
    let mut target = ScriptedTarget::start_with_protocol(Some("graphql-ws")).await;

    let mut spec = TargetSpec::new(&target.url);
    spec.headers
        .insert("Authorization".to_string(), "Bearer secret".to_string());
    spec.headers
        .insert("X-Client".to_string(), "wsproxy-test".to_string());
    spec.protocols = vec!["graphql-ws".to_string(), "chat".to_string()];

    let _client = connect(relay, &spec).await;
    let (_target_ws, headers) = target.next().await;

    assert_eq!(headers["authorization"], "Bearer secret");
    assert_eq!(headers["x-client"], "wsproxy-test");
    assert_eq!(headers["sec-websocket-protocol"], "graphql-ws, chat");
}

#[tokio::test]
async fn malformed_headers_parameter_still_connects() {
    let (relay, state) = start_relay().await;
    let mut target = ScriptedTarget::start().await;

    let query = ConnectParams {
        url: Some(target.url.clone()),
        headers: Some("{broken".to_string()),
        protocols: None,
    }
    .to_query();
    let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{relay}/?{query}"))
        .await
        .unwrap();
    let (mut target_ws, headers) = target.next().await;
    assert!(!headers.contains_key("broken"));

    client.send(Message::Text("hello".into())).await.unwrap();
    assert_eq!(next_data(&mut target_ws).await, Message::Text("hello".into()));
    assert_eq!(state.registry.snapshot(), 1);
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test]
async fn target_close_propagates_to_client() {
    let (relay, state) = start_relay().await;
    let mut target = ScriptedTarget::start().await;

    let mut client = connect(relay, &TargetSpec::new(&target.url)).await;
    let (mut target_ws, _) = target.next().await;
    wait_for_connections(&state, 1).await;

    target_ws.close(None).await.unwrap();

    let msg = next_data(&mut client).await;
    assert!(msg.is_close(), "expected close, got {msg:?}");
    wait_for_connections(&state, 0).await;

    // And it stays there: the client's own close does not decrement again.
    let _ = client.close(None).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(state.registry.snapshot(), 0);
}

#[tokio::test]
async fn target_close_handshake_completes() {
    let (relay, state) = start_relay().await;
    let mut target = ScriptedTarget::start().await;

    let mut client = connect(relay, &TargetSpec::new(&target.url)).await;
    let (mut target_ws, _) = target.next().await;
    wait_for_connections(&state, 1).await;

    target_ws.close(None).await.unwrap();
    assert!(next_data(&mut client).await.is_close());

    // The relay answers the target's close frame instead of resetting.
    let after = tokio::time::timeout(Duration::from_secs(5), target_ws.next())
        .await
        .expect("timed out waiting for close reply");
    assert!(
        matches!(after, None | Some(Ok(Message::Close(_)))),
        "expected close reply, got {after:?}"
    );
    wait_for_connections(&state, 0).await;
}

#[tokio::test]
async fn client_close_propagates_to_target() {
    let (relay, state) = start_relay().await;
    let mut target = ScriptedTarget::start().await;

    let mut client = connect(relay, &TargetSpec::new(&target.url)).await;
    let (mut target_ws, _) = target.next().await;

    client.close(None).await.unwrap();

    let msg = next_data(&mut target_ws).await;
    assert!(msg.is_close(), "expected close, got {msg:?}");
    wait_for_connections(&state, 0).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_closes_decrement_once_per_session() {
    const SESSIONS: usize = 32;

    let (relay, state) = start_relay().await;
    let mut target = ScriptedTarget::start().await;

    let mut pairs = Vec::with_capacity(SESSIONS);
    for _ in 0..SESSIONS {
        let client = connect(relay, &TargetSpec::new(&target.url)).await;
        let (target_ws, _) = target.next().await;
        pairs.push((client, target_ws));
    }
    wait_for_connections(&state, SESSIONS as u64).await;

    // Close both ends of every session at the same time.
    let mut closers = Vec::new();
    for (mut client, mut target_ws) in pairs {
        closers.push(tokio::spawn(async move {
            let _ = client.close(None).await;
            while let Some(Ok(_)) = client.next().await {}
        }));
        closers.push(tokio::spawn(async move {
            let _ = target_ws.close(None).await;
            while let Some(Ok(_)) = target_ws.next().await {}
        }));
    }
    for closer in closers {
        closer.await.unwrap();
    }

    wait_for_connections(&state, 0).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(state.registry.snapshot(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn count_tracks_live_sessions_under_churn() {
    let (relay, state) = start_relay().await;
    let mut target = ScriptedTarget::start().await;

    // Open sessions in waves, closing a varying subset from alternating
    // sides, and check the count against what should still be alive.
    let mut alive: Vec<(ClientWs, TargetWs)> = Vec::new();
    for wave in 0..5usize {
        for _ in 0..8 {
            let client = connect(relay, &TargetSpec::new(&target.url)).await;
            let (target_ws, _) = target.next().await;
            alive.push((client, target_ws));
        }
        wait_for_connections(&state, alive.len() as u64).await;

        let to_close = (wave + 3).min(alive.len());
        let closing: Vec<_> = alive.drain(..to_close).collect();
        let mut closers = Vec::new();
        for (i, (mut client, mut target_ws)) in closing.into_iter().enumerate() {
            closers.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    let _ = client.close(None).await;
                } else {
                    let _ = target_ws.close(None).await;
                }
                while let Some(Ok(_)) = client.next().await {}
            }));
        }
        for closer in closers {
            closer.await.unwrap();
        }
        wait_for_connections(&state, alive.len() as u64).await;
    }

    drop(alive);
    wait_for_connections(&state, 0).await;
}

#[tokio::test]
async fn rejected_and_failed_sessions_leave_count_unchanged() {
    let (relay, state) = start_relay().await;
    let mut target = ScriptedTarget::start().await;

    let _live = connect(relay, &TargetSpec::new(&target.url)).await;
    let _live_target = target.next().await;
    wait_for_connections(&state, 1).await;

    // Missing URL.
    let (mut rejected, _) = tokio_tungstenite::connect_async(format!("ws://{relay}/"))
        .await
        .unwrap();
    let msg = next_data(&mut rejected).await;
    assert!(msg.is_close());

    // Unreachable target.
    let dead = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_url = format!("ws://{}/", dead.local_addr().unwrap());
    drop(dead);
    let mut failed = connect(relay, &TargetSpec::new(dead_url)).await;
    let msg = next_data(&mut failed).await;
    assert!(msg.is_close());

    wait_for_connections(&state, 1).await;
}
