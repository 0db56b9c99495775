//! Shared definitions for the `WsProxy` relay: connection parameters,
//! close codes, and the status document.

pub mod close;
pub mod params;
pub mod status;
