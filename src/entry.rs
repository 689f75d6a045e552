// SPDX-License-Identifier: MIT

//! The per-device [`ConnectionEntry`]: the authoritative record a device's
//! origin maps to across transport lifetimes. Bundles the current transport
//! handle, the worker execution context, and the pending-response table that
//! bridges worker-thread requests to receive-loop deliveries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};

use crate::codec::Payload;
use crate::error::EntryError;
use crate::worker::Worker;

/// Opaque handle to the currently installed transport.
///
/// `tx` feeds the writer half of the device's WebSocket; `generation` is a
/// monotonically increasing counter assigned at install time, used by the
/// supervisor's cleanup step to tell whether the connection that is
/// finishing is still the one installed in the entry.
#[derive(Clone)]
pub struct TransportHandle {
    tx: tokio::sync::mpsc::UnboundedSender<axum::extract::ws::Message>,
    generation: u64,
}

impl TransportHandle {
    pub fn new(
        tx: tokio::sync::mpsc::UnboundedSender<axum::extract::ws::Message>,
        generation: u64,
    ) -> Self {
        Self { tx, generation }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

struct EntryState {
    transport: Option<TransportHandle>,
    worker_task: Option<std::thread::JoinHandle<()>>,
    worker: Option<Arc<dyn Worker>>,
    pending: HashMap<u32, oneshot::Sender<Result<Payload, EntryError>>>,
}

/// The per-origin record held by the registry. Spans multiple transport
/// lifetimes: created once on first admission, updated on reconnect, and
/// never torn down individually during normal operation.
pub struct ConnectionEntry {
    pub origin: Arc<str>,
    state: Mutex<EntryState>,
    next_message_id: AtomicU32,
    next_transport_generation: AtomicU32,
}

impl ConnectionEntry {
    pub fn new(origin: Arc<str>) -> Self {
        Self {
            origin,
            state: Mutex::new(EntryState {
                transport: None,
                worker_task: None,
                worker: None,
                pending: HashMap::new(),
            }),
            next_message_id: AtomicU32::new(1),
            next_transport_generation: AtomicU32::new(1),
        }
    }

    /// Allocate the next transport generation id, for the caller to pass to
    /// [`TransportHandle::new`] before calling [`Self::replace_transport`].
    pub fn next_transport_generation(&self) -> u64 {
        self.next_transport_generation.fetch_add(1, Ordering::Relaxed) as u64
    }

    /// Whether the entry's prior transport, if any, is still installed (i.e.
    /// no transport has replaced it since `generation` was issued).
    pub async fn has_open_transport_other_than(&self, generation: u64) -> bool {
        let state = self.state.lock().await;
        matches!(&state.transport, Some(t) if t.generation() != generation)
    }

    pub async fn has_transport(&self) -> bool {
        self.state.lock().await.transport.is_some()
    }

    /// True if `generation` is still the entry's installed transport. The
    /// check the supervisor's cleanup step uses to decide whether it owns
    /// the connection that just finished.
    pub async fn current_transport_is(&self, generation: u64) -> bool {
        let state = self.state.lock().await;
        matches!(&state.transport, Some(t) if t.generation() == generation)
    }

    pub async fn worker_alive(&self) -> bool {
        let state = self.state.lock().await;
        state.worker_task.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub async fn worker_is_stopping(&self) -> bool {
        let state = self.state.lock().await;
        state.worker.as_ref().is_some_and(|w| w.is_stopping())
    }

    pub async fn worker(&self) -> Option<Arc<dyn Worker>> {
        self.state.lock().await.worker.clone()
    }

    /// Install a freshly constructed worker and its OS-thread join handle,
    /// replacing whatever was there (the prior one, if any, must already be
    /// confirmed dead by the caller per the admission decision table).
    pub async fn install_worker(
        &self,
        worker: Arc<dyn Worker>,
        task: std::thread::JoinHandle<()>,
    ) {
        let mut state = self.state.lock().await;
        state.worker = Some(worker);
        state.worker_task = Some(task);
    }

    /// Take the worker join handle out of the entry (used by the supervisor
    /// when handing a stopped worker off to the reaper).
    pub async fn take_worker_task(&self) -> Option<std::thread::JoinHandle<()>> {
        self.state.lock().await.worker_task.take()
    }

    /// `replace_transport`: atomic under the entry mutex. Cancels all
    /// pending slots with [`EntryError::Disconnected`] before swapping in
    /// the new transport.
    pub async fn replace_transport(&self, new: TransportHandle) {
        let mut state = self.state.lock().await;
        for (_, tx) in state.pending.drain() {
            let _ = tx.send(Err(EntryError::Disconnected));
        }
        state.transport = Some(new);
    }

    /// Drop the current transport without installing a new one (used by
    /// `force_disconnect` and shutdown), cancelling pending slots the same
    /// way `replace_transport` does.
    pub async fn clear_transport(&self) {
        let mut state = self.state.lock().await;
        for (_, tx) in state.pending.drain() {
            let _ = tx.send(Err(EntryError::Disconnected));
        }
        state.transport = None;
    }

    /// `deliver`: fulfills the matching pending slot. If no slot matches,
    /// the frame is discarded (late response) and logged at debug level.
    pub async fn deliver(&self, message_id: u32, payload: Payload) {
        let mut state = self.state.lock().await;
        match state.pending.remove(&message_id) {
            Some(tx) => {
                let _ = tx.send(Ok(payload));
            }
            None => {
                tracing::debug!(
                    origin = %self.origin,
                    message_id,
                    "late response for unknown pending slot, discarding"
                );
            }
        }
    }

    /// `await_response`: registers a pending slot for `message_id` and
    /// blocks until the receive loop fulfills it or `timeout` elapses. On
    /// timeout the slot is removed and [`EntryError::Timeout`] is returned.
    pub async fn await_response(
        &self,
        message_id: u32,
        timeout: Duration,
    ) -> Result<Payload, EntryError> {
        let rx = self.register_pending(message_id).await;
        self.wait_for(rx, message_id, timeout).await
    }

    /// `send_request`: allocates a `message_id`, writes the outbound frame,
    /// then awaits the response.
    pub async fn send_request(
        &self,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Payload, EntryError> {
        let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let rx = self.register_pending(message_id).await;
        if self.write_frame(message_id, &payload).await.is_err() {
            self.remove_pending(message_id).await;
            return Err(EntryError::Disconnected);
        }
        self.wait_for(rx, message_id, timeout).await
    }

    async fn register_pending(
        &self,
        message_id: u32,
    ) -> oneshot::Receiver<Result<Payload, EntryError>> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock().await;
        state.pending.insert(message_id, tx);
        rx
    }

    async fn remove_pending(&self, message_id: u32) {
        self.state.lock().await.pending.remove(&message_id);
    }

    async fn wait_for(
        &self,
        rx: oneshot::Receiver<Result<Payload, EntryError>>,
        message_id: u32,
        timeout: Duration,
    ) -> Result<Payload, EntryError> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped without sending: the entry was torn down from
            // under us without going through `replace_transport`/`clear_transport`.
            Ok(Err(_)) => Err(EntryError::Disconnected),
            Err(_elapsed) => {
                self.remove_pending(message_id).await;
                Err(EntryError::Timeout)
            }
        }
    }

    /// Sends a WebSocket close frame over the transport installed for
    /// `generation`, if it is still current. A no-op if a newer transport
    /// has already replaced it (the connection handler tearing down this
    /// generation no longer owns the entry's transport).
    pub async fn send_close(&self, generation: u64) -> Result<(), ()> {
        let state = self.state.lock().await;
        match &state.transport {
            Some(t) if t.generation() == generation => {
                t.tx.send(axum::extract::ws::Message::Close(None)).map_err(|_| ())
            }
            _ => Err(()),
        }
    }

    async fn write_frame(&self, message_id: u32, payload: &Payload) -> Result<(), ()> {
        let tx = {
            let state = self.state.lock().await;
            match &state.transport {
                Some(t) => t.tx.clone(),
                None => return Err(()),
            }
        };
        tx.send(crate::codec::encode(message_id, payload)).map_err(|_| ())
    }
}

#[cfg(test)]
#[path = "entry_tests.rs"]
mod tests;
