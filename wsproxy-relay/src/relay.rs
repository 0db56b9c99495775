//! Relay server surface: shared state, HTTP routes, and server startup.
//!
//! Every path except `/status` accepts a WebSocket upgrade. The upgrade's
//! query string names the target (see [`wsproxy_proto::params`]) and the
//! upgraded socket is handed to [`session::run_session`].

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{RawQuery, State};
use axum::response::IntoResponse;
use wsproxy_proto::params::ConnectParams;
use wsproxy_proto::status::StatusReport;

use crate::registry::ConnectionRegistry;
use crate::session;

/// Shared relay server state.
#[derive(Debug)]
pub struct RelayState {
    /// Active session counter.
    pub registry: Arc<ConnectionRegistry>,
    /// When this state was created; the base for reported uptime.
    started_at: Instant,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates state with an empty registry, starting the uptime clock now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            started_at: Instant::now(),
        }
    }

    /// Seconds since the state was created.
    #[must_use]
    pub fn uptime_secs(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    /// The current status document.
    #[must_use]
    pub fn status(&self) -> StatusReport {
        StatusReport::ok(self.registry.snapshot(), self.uptime_secs())
    }
}

/// Builds the relay's router.
pub fn router(state: Arc<RelayState>) -> axum::Router {
    axum::Router::new()
        .route("/status", axum::routing::get(status_handler))
        .fallback(ws_handler)
        .with_state(state)
}

/// Starts the relay server on the given address and returns the bound address
/// and a join handle.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a caller-owned [`RelayState`], so the caller
/// can observe the registry.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades any request to a relay session.
async fn ws_handler(
    ws: WebSocketUpgrade,
    RawQuery(query): RawQuery,
    State(state): State<Arc<RelayState>>,
) -> impl IntoResponse {
    let params = ConnectParams::from_query(query.as_deref().unwrap_or_default());
    let registry = Arc::clone(&state.registry);
    ws.on_upgrade(move |socket| session::run_session(socket, params, registry))
}

/// axum handler for `GET /status`.
async fn status_handler(State(state): State<Arc<RelayState>>) -> axum::Json<StatusReport> {
    axum::Json(state.status())
}
