// SPDX-License-Identifier: MIT

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcomes a pending-response wait on a [`crate::entry::ConnectionEntry`] can resolve to.
///
/// Narrower than [`BrokerError`]: a caller of `send_request`/`await_response`
/// only ever observes one of these two, per the invariant that exactly one
/// of {delivered, timed out, cancelled} occurs for every slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryError {
    /// `await_response` exceeded its timeout; the slot was removed.
    Timeout,
    /// The transport was replaced, or the entry is quiescing, while the
    /// request was outstanding.
    Disconnected,
}

impl fmt::Display for EntryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("pending response timed out"),
            Self::Disconnected => f.write_str("connection disconnected"),
        }
    }
}

impl std::error::Error for EntryError {}

/// Top-level error taxonomy for the broker (see error handling design).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerError {
    /// Missing or invalid handshake data.
    AuthFailure,
    /// Admission decision table rejected the connection.
    Rejected,
    /// The worker factory declined to construct a worker.
    WorkerSpawnFailure,
    /// The transport closed, detected by the receive loop.
    TransportClosed,
    /// A pending response wait exceeded its timeout.
    PendingTimeout,
    /// A pending response wait was cancelled by a transport replace.
    PendingCancelled,
    /// A worker did not join within the reaper's bound and was requeued.
    JoinTimeout,
    /// An inbound frame could not be parsed; the frame was dropped.
    MalformedFrame,
}

impl BrokerError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthFailure => "AUTH_FAILURE",
            Self::Rejected => "REJECTED",
            Self::WorkerSpawnFailure => "WORKER_SPAWN_FAILURE",
            Self::TransportClosed => "TRANSPORT_CLOSED",
            Self::PendingTimeout => "PENDING_TIMEOUT",
            Self::PendingCancelled => "PENDING_CANCELLED",
            Self::JoinTimeout => "JOIN_TIMEOUT",
            Self::MalformedFrame => "MALFORMED_FRAME",
        }
    }
}

impl From<EntryError> for BrokerError {
    fn from(e: EntryError) -> Self {
        match e {
            EntryError::Timeout => Self::PendingTimeout,
            EntryError::Disconnected => Self::PendingCancelled,
        }
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for BrokerError {}
