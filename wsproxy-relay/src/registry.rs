//! Process-wide count of active relay sessions.
//!
//! The [`ConnectionRegistry`] is the only state shared across sessions. Each
//! accepted connection is admitted with a [`SessionTicket`]; releasing the
//! ticket decrements the count, and the ticket guarantees that happens at
//! most once no matter how many close paths race to release it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Atomic counter of sessions that are connecting or forwarding.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    active: AtomicU64,
}

impl ConnectionRegistry {
    /// Creates a registry with zero active sessions.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            active: AtomicU64::new(0),
        }
    }

    /// Counts a newly accepted connection and returns the new total.
    fn increment(&self) -> u64 {
        self.active.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Admits a connection: increments the count and returns the ticket
    /// that owns the matching decrement.
    #[must_use]
    pub fn admit(self: &Arc<Self>) -> SessionTicket {
        let connections = self.increment();
        tracing::info!(connections, "new connection");
        SessionTicket {
            registry: Arc::clone(self),
            released: AtomicBool::new(false),
        }
    }

    /// Current number of active sessions.
    #[must_use]
    pub fn snapshot(&self) -> u64 {
        self.active.load(Ordering::Acquire)
    }

    /// Decrements the count, saturating at zero, and returns the new total.
    fn decrement(&self) -> u64 {
        match self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(previous) => previous - 1,
            Err(_) => {
                tracing::error!("connection count decrement below zero");
                0
            }
        }
    }
}

/// One-shot guard for a single session's registry decrement.
///
/// Dropping an unreleased ticket releases it, so a session task that is
/// aborted or panics still leaves the count balanced.
#[derive(Debug)]
pub struct SessionTicket {
    registry: Arc<ConnectionRegistry>,
    released: AtomicBool,
}

impl SessionTicket {
    /// Decrements the registry if this ticket has not been released yet.
    ///
    /// Returns `true` only for the call that performed the decrement.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        let connections = self.registry.decrement();
        tracing::info!(connections, "connection closed");
        true
    }

    #[cfg(test)]
    fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for SessionTicket {
    fn drop(&mut self) {
        self.release();
    }
}
