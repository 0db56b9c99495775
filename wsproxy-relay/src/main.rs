//! `WsProxy` relay server -- transparent WebSocket relay.
//!
//! An axum server that pairs each inbound WebSocket with an outbound one to
//! the target named in the upgrade query string, and serves `GET /status`.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:3000
//! cargo run --bin wsproxy-relay
//!
//! # Run on a custom port
//! cargo run --bin wsproxy-relay -- --port 8080
//!
//! # Or via environment variable
//! PORT=8080 cargo run --bin wsproxy-relay
//! ```

use clap::Parser;
use wsproxy_relay::config::{RelayCliArgs, RelayConfig};
use wsproxy_relay::relay;

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    // Outbound wss:// targets need a process-wide rustls provider.
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    let bind_addr = config.bind_addr();
    tracing::info!(addr = %bind_addr, "starting wsproxy relay server");

    match relay::start_server(&bind_addr).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay server listening");
            tracing::info!(
                "status endpoint: http://localhost:{}/status",
                bound_addr.port()
            );
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    }
}
