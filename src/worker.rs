// SPDX-License-Identifier: MIT

//! The per-device worker contract: what a device's stateful execution
//! context looks like from the broker's point of view, and the factory that
//! constructs one on admission.
//!
//! The broker treats a worker as opaque business logic running on its own
//! OS thread; this module only defines the seam, not any concrete worker.

use std::sync::Arc;

use async_trait::async_trait;

use crate::entry::ConnectionEntry;
use crate::error::BrokerError;

/// Which variant of worker to build, mirrored from the admission decision
/// table's "config-mode override" row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    /// Ordinary device-driving worker.
    Normal,
    /// Config-only worker; always rebuilt regardless of the existing
    /// entry's worker state.
    Config,
}

/// A handle to the worker's outbound path, handed to business logic running
/// on the worker's OS thread. Cloneable and thread-safe: a worker may hold
/// it for its whole lifetime. Captures the broker's [`tokio::runtime::Handle`]
/// at construction time (always from async code running on that runtime, via
/// `WorkerFactory::build`), so a worker's own OS thread can call the
/// `_blocking` methods directly without separately threading a `Handle` of
/// its own down to its thread.
#[derive(Clone)]
pub struct Communicator {
    entry: Arc<ConnectionEntry>,
    command_timeout: std::time::Duration,
    runtime: tokio::runtime::Handle,
}

impl Communicator {
    pub fn new(entry: Arc<ConnectionEntry>, command_timeout: std::time::Duration) -> Self {
        Self { entry, command_timeout, runtime: tokio::runtime::Handle::current() }
    }

    /// Send a request to the device and await (the calling async task) until
    /// the matching response arrives or the configured command timeout
    /// elapses. For use from async code already running on the broker's
    /// runtime; a worker's own OS thread should use [`Self::send_request_blocking`].
    pub async fn send_request(
        &self,
        payload: crate::codec::Payload,
    ) -> Result<crate::codec::Payload, BrokerError> {
        self.entry
            .send_request(payload, self.command_timeout)
            .await
            .map_err(Into::into)
    }

    /// Send a request with an explicit timeout override (used for commands
    /// the worker knows can take longer, e.g. a route calculation roundtrip).
    pub async fn send_request_with_timeout(
        &self,
        payload: crate::codec::Payload,
        timeout: std::time::Duration,
    ) -> Result<crate::codec::Payload, BrokerError> {
        self.entry.send_request(payload, timeout).await.map_err(Into::into)
    }

    /// Blocking counterpart to [`Self::send_request`], for direct use from a
    /// worker's own OS thread: bridges back onto the broker's runtime via
    /// the captured `Handle` rather than requiring the caller to hold one.
    pub fn send_request_blocking(
        &self,
        payload: crate::codec::Payload,
    ) -> Result<crate::codec::Payload, BrokerError> {
        self.runtime.block_on(self.send_request(payload))
    }

    /// Blocking counterpart to [`Self::send_request_with_timeout`].
    pub fn send_request_with_timeout_blocking(
        &self,
        payload: crate::codec::Payload,
        timeout: std::time::Duration,
    ) -> Result<crate::codec::Payload, BrokerError> {
        self.runtime.block_on(self.send_request_with_timeout(payload, timeout))
    }

    pub fn origin(&self) -> Arc<str> {
        self.entry.origin.clone()
    }
}

/// A device's stateful execution context. The broker never inspects
/// worker-internal state beyond [`Worker::is_stopping`]; everything else
/// about how a worker drives its device is opaque business logic.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Spawns the worker's dedicated OS thread and returns its join handle.
    /// The supervisor calls this once per worker instance, right after
    /// `WorkerFactory::build` for a fresh build, or when reusing an
    /// existing worker whose thread is not currently alive (decision table
    /// row "present, no, no").
    fn start(self: Arc<Self>) -> std::thread::JoinHandle<()>;

    /// Signals the worker to wind down. The broker calls this during
    /// `force_disconnect`, worker replacement, and shutdown; it must not
    /// block.
    fn stop(&self);

    /// Whether [`Worker::stop`] has been called. Used by the admission
    /// decision table to distinguish a worker that is merely between
    /// requests from one that is quiescing and should be replaced once its
    /// thread joins.
    fn is_stopping(&self) -> bool;

    /// The communicator this worker was constructed with, for callers that
    /// need to issue requests to the device outside the worker's own
    /// thread (e.g. `communicator_for`).
    fn communicator(&self) -> Communicator;

    /// Adjusts the worker's geofix sleep interval. Returns `false` if the
    /// worker does not support geofix control.
    fn set_geofix_sleeptime(&self, _seconds: u32) -> bool {
        false
    }

    /// Marks the worker's job loop active.
    fn set_job_activated(&self) {}

    /// Marks the worker's job loop inactive.
    fn set_job_deactivated(&self) {}
}

/// Constructs workers on admission. Implementors typically consult an
/// external device catalogue (see [`crate::auth::DeviceCatalogue`]) to look
/// up per-device configuration before constructing the worker.
#[async_trait]
pub trait WorkerFactory: Send + Sync {
    /// Construct a worker for `origin`. May perform async I/O (e.g. reading
    /// device configuration); returns `None` if construction should be
    /// refused (e.g. the device is paused externally), in which case the
    /// connection is rejected with [`BrokerError::WorkerSpawnFailure`].
    async fn build(
        &self,
        origin: Arc<str>,
        mode: WorkerMode,
        communicator: Communicator,
    ) -> Option<Arc<dyn Worker>>;
}
