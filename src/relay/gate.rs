//! Readiness gate.
//!
//! The gate is open only while the outbound transport is `Ready` and a
//! destination chat has been resolved. It owns no state of its own: it reads
//! the [`SharedLink`] written by the connection lifecycle.

use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;

use super::ConnectionState;

/// Resolved identifier of the destination chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DestinationHandle {
    /// Transport chat id (a WhatsApp JID)
    pub id: String,
    /// Display name at resolution time
    pub name: String,
}

/// Connection state plus the resolved destination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkState {
    pub connection: ConnectionState,
    pub destination: Option<DestinationHandle>,
}

impl LinkState {
    /// `Ready` and a destination is known.
    pub fn gate_open(&self) -> bool {
        self.connection == ConnectionState::Ready && self.destination.is_some()
    }
}

/// Link state shared between the lifecycle (writer) and the gate (readers).
#[derive(Debug, Clone, Default)]
pub struct SharedLink {
    inner: Arc<RwLock<LinkState>>,
}

impl SharedLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> LinkState {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_connection(&self, state: ConnectionState) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .connection = state;
    }

    pub(crate) fn set_destination(&self, destination: Option<DestinationHandle>) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .destination = destination;
    }
}

/// Read-only view deciding whether the dispatch loop may send.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    link: SharedLink,
}

impl ReadinessGate {
    pub fn new(link: SharedLink) -> Self {
        Self { link }
    }

    pub fn is_open(&self) -> bool {
        self.link.snapshot().gate_open()
    }

    /// The destination, but only while the gate is open.
    pub fn open_destination(&self) -> Option<DestinationHandle> {
        let state = self.link.snapshot();
        if state.gate_open() {
            state.destination
        } else {
            None
        }
    }
}
