//! `WsProxy` relay server library.
//!
//! Exposes the relay server for use in tests and embedding. The relay
//! accepts WebSocket connections, opens a matching connection to the target
//! each client names, and forwards frames both ways until either side
//! disconnects.

pub mod config;
pub mod frame;
pub mod registry;
pub mod relay;
pub mod session;
