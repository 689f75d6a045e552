// SPDX-License-Identifier: MIT

//! The device WebSocket handler: admission, transport installation, and the
//! per-connection receive loop. This is the connection handler half of the
//! broker supervisor (the other half, the exposed control operations, lives
//! on [`crate::state::BrokerState`]).

use std::sync::Arc;

use axum::extract::{State, WebSocketUpgrade};
use axum::extract::ws::{Message, WebSocket};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;

use crate::auth::{AuthDecision, Authenticator};
use crate::codec;
use crate::entry::{ConnectionEntry, TransportHandle};
use crate::registry::AdmissionDenied;
use crate::state::BrokerState;
use crate::worker::WorkerMode;

/// `GET /`: device WebSocket upgrade.
pub async fn ws_handler(
    State(state): State<Arc<BrokerState>>,
    headers: axum::http::HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let max_frame_size = state.config.max_frame_size;
    ws.max_frame_size(max_frame_size)
        .max_message_size(max_frame_size)
        .on_upgrade(move |socket| handle_connection(socket, headers, state))
}

/// Whether this handshake requests a config-only worker rebuild,
/// regardless of the existing entry's worker state (decision table's
/// "config-mode override" row).
fn wants_config_mode(headers: &axum::http::HeaderMap) -> bool {
    headers.get("x-worker-mode").and_then(|v| v.to_str().ok()).is_some_and(|v| v.eq_ignore_ascii_case("config"))
}

async fn handle_connection(socket: WebSocket, headers: axum::http::HeaderMap, state: Arc<BrokerState>) {
    // Step 1: shutdown already in progress, drop silently.
    if state.shutdown.is_cancelled() {
        return;
    }

    // Step 2: authenticate.
    let origin = match Authenticator::authenticate(&headers, state.mapping.as_deref(), state.catalogue.as_ref()).await
    {
        AuthDecision::Accepted(origin) => origin,
        AuthDecision::Rejected(rejection) => {
            tracing::warn!(
                origin = rejection.origin().map(|o| o.as_ref()).unwrap_or("<unknown>"),
                "{}",
                rejection.advisory()
            );
            return;
        }
    };

    // Step 3: serialize admission per origin.
    if let Err(AdmissionDenied::AlreadyAdmitting) = state.registry.begin_admission(&origin).await {
        tracing::warn!(origin = %origin, "rejecting connection: another handshake is already being admitted");
        return;
    }

    let outcome = admit(&state, &origin, &headers).await;

    match outcome {
        AdmissionOutcome::Proceed { entry, generation } => {
            state.registry.end_admission(&origin).await;
            run_receive_loop(socket, &entry, generation, &state, &origin).await;
            cleanup(&entry, generation, &state, &origin).await;
        }
        AdmissionOutcome::Reject => {
            let backoff = state.config.backoff_range();
            let seconds = rand::rng().random_range(backoff);
            state.registry.end_admission(&origin).await;
            tokio::time::sleep(std::time::Duration::from_secs_f64(seconds)).await;
        }
    }
}

enum AdmissionOutcome {
    Proceed { entry: Arc<ConnectionEntry>, generation: u64 },
    Reject,
}

/// Step 4: compute and apply the admission decision table, then (step 5)
/// install the new transport and (folded in, since every `Proceed` row
/// here starts from a worker task that is not alive) start the worker.
async fn admit(state: &BrokerState, origin: &Arc<str>, headers: &axum::http::HeaderMap) -> AdmissionOutcome {
    let config_mode = wants_config_mode(headers);
    let mode = if config_mode { WorkerMode::Config } else { WorkerMode::Normal };

    let existing = state.registry.get(origin).await;

    let needs_rebuild = match &existing {
        None => true,
        Some(_) if config_mode => true,
        Some(entry) => {
            if entry.has_transport().await {
                tracing::info!(origin = %origin, "rejecting connection: prior connection still open");
                return AdmissionOutcome::Reject;
            }
            let alive = entry.worker_alive().await;
            let stopping = entry.worker_is_stopping().await;
            if alive && !stopping {
                tracing::info!(origin = %origin, "rejecting connection: waiting for prior connection's worker to die");
                return AdmissionOutcome::Reject;
            }
            if alive && stopping {
                tracing::info!(origin = %origin, "rejecting connection: racing an outgoing worker stop");
                return AdmissionOutcome::Reject;
            }
            // Transport closed, worker thread dead: rebuild via the factory
            // rather than reconnecting onto a worker that no longer runs.
            true
        }
    };

    // A brand-new device's entry is built locally and only published into
    // the registry once the factory has actually produced a worker for it.
    // A failed build must leave the registry untouched for this attempt,
    // not strand an empty entry behind.
    let candidate = existing.clone().unwrap_or_else(|| Arc::new(ConnectionEntry::new(origin.clone())));

    if needs_rebuild {
        // A config-mode rebuild can land on an entry whose worker is still
        // alive; that worker must be stopped and handed to the reaper before
        // it is replaced, or its thread spins forever unobserved.
        if candidate.worker_alive().await {
            if let Some(worker) = candidate.worker().await {
                worker.stop();
            }
            if let Some(task) = candidate.take_worker_task().await {
                state.reaper.enqueue(origin.clone(), task);
            }
        }

        let communicator = crate::worker::Communicator::new(candidate.clone(), state.config.command_timeout());
        match state.worker_factory.build(origin.clone(), mode, communicator).await {
            Some(worker) => {
                let task = worker.clone().start();
                candidate.install_worker(worker, task).await;
            }
            None => {
                tracing::warn!(origin = %origin, "worker factory declined to build a worker");
                return AdmissionOutcome::Reject;
            }
        }
    }

    let entry = match existing {
        Some(entry) => entry,
        None => state.registry.insert(origin.clone(), candidate).await,
    };

    let generation = entry.next_transport_generation();
    AdmissionOutcome::Proceed { entry, generation }
}

/// Splits the upgraded socket, installs the write half as the entry's
/// transport, and pumps inbound frames into `deliver` until the transport
/// closes.
async fn run_receive_loop(
    socket: WebSocket,
    entry: &Arc<ConnectionEntry>,
    generation: u64,
    state: &BrokerState,
    origin: &Arc<str>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (writer_tx, mut writer_rx) = tokio::sync::mpsc::unbounded_channel::<Message>();
    entry.replace_transport(TransportHandle::new(writer_tx, generation)).await;

    let mut writer_task = tokio::spawn(async move {
        while let Some(message) = writer_rx.recv().await {
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    let read_timeout = state.config.read_timeout();
    loop {
        let next = tokio::select! {
            biased;
            () = state.shutdown.cancelled() => break,
            next = tokio::time::timeout(read_timeout, ws_rx.next()) => next,
        };
        match next {
            Ok(Some(Ok(Message::Text(text)))) => match codec::decode_text(&text) {
                Some(frame) => entry.deliver(frame.message_id, frame.payload).await,
                None => tracing::warn!(origin = %origin, "dropping malformed text frame"),
            },
            Ok(Some(Ok(Message::Binary(bytes)))) => match codec::decode_binary(&bytes) {
                Some(frame) => entry.deliver(frame.message_id, frame.payload).await,
                None => tracing::warn!(origin = %origin, "dropping malformed binary frame"),
            },
            Ok(Some(Ok(Message::Close(_)))) => break,
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => {}
            Ok(Some(Err(_))) | Ok(None) => break,
            Err(_elapsed) => {
                tokio::task::yield_now().await;
            }
        }
    }

    drop(ws_rx);
    // Give the writer task a chance to flush a graceful close handshake
    // before forcibly aborting it, bounded by the configured close timeout
    // (spec.md §6's 10s close-handshake timeout).
    let _ = entry.send_close(generation).await;
    if tokio::time::timeout(state.config.close_timeout(), &mut writer_task).await.is_err() {
        tracing::debug!(origin = %origin, "writer task did not exit within the close-handshake timeout, aborting");
        writer_task.abort();
    }
}

/// Step 11: if this connection's transport is still the entry's current
/// one, stop the worker and hand it to the reaper; otherwise a newer
/// connection has already taken over and this cleanup is a no-op.
async fn cleanup(entry: &Arc<ConnectionEntry>, generation: u64, state: &BrokerState, origin: &Arc<str>) {
    if entry.current_transport_is(generation).await {
        if let Some(worker) = entry.worker().await {
            worker.stop();
        }
        if let Some(task) = entry.take_worker_task().await {
            state.reaper.enqueue(origin.clone(), task);
        }
        entry.clear_transport().await;
    }
}
