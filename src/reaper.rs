// SPDX-License-Identifier: MIT

//! The worker reaper: a single long-lived task that joins stopped worker
//! threads without ever blocking the connection handler. Workers that
//! haven't finished within the join bound are requeued indefinitely, up to
//! the overall shutdown timeout.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// A worker thread handed off for joining, plus the origin it belonged to
/// (for logging only).
pub struct JoinRequest {
    pub origin: Arc<str>,
    pub handle: std::thread::JoinHandle<()>,
}

/// Handle callers use to enqueue a worker for joining. Cloneable and
/// cheap; every clone shares the same outstanding-request counter the
/// reaper loop watches to decide when it may exit.
#[derive(Clone)]
pub struct ReaperHandle {
    tx: tokio::sync::mpsc::UnboundedSender<JoinRequest>,
    outstanding: Arc<AtomicUsize>,
}

impl ReaperHandle {
    /// Enqueue a worker thread for joining. Returns `false` if the reaper
    /// loop has already exited (shutdown fully drained).
    pub fn enqueue(&self, origin: Arc<str>, handle: std::thread::JoinHandle<()>) -> bool {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(JoinRequest { origin, handle }).is_err() {
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }
}

/// Every sixth requeue of the same worker is logged at `warn` instead of
/// `debug`, so a thread stuck well past its join bound becomes visible in
/// default-level logs without flooding them every cycle.
const WARN_EVERY_N_ATTEMPTS: u32 = 6;

/// Builds the channel pair the reaper loop and its callers share.
pub fn channel() -> (ReaperHandle, tokio::sync::mpsc::UnboundedReceiver<JoinRequest>) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = ReaperHandle { tx, outstanding: Arc::new(AtomicUsize::new(0)) };
    (handle, rx)
}

/// Runs the reaper loop until `shutdown` is cancelled and every enqueued
/// worker has been joined. Each dequeued handle gets a bounded join
/// attempt; a still-running thread is requeued (without incrementing the
/// outstanding counter again) rather than retried inline, so one stuck
/// worker never delays the others already in the queue.
pub async fn run(
    mut queue: tokio::sync::mpsc::UnboundedReceiver<JoinRequest>,
    self_handle: ReaperHandle,
    join_timeout: Duration,
    shutdown: CancellationToken,
) {
    let mut attempts: std::collections::HashMap<Arc<str>, u32> = std::collections::HashMap::new();

    loop {
        let outstanding_zero = self_handle.outstanding.load(Ordering::SeqCst) == 0;
        let request = tokio::select! {
            biased;
            maybe_req = queue.recv() => maybe_req,
            () = shutdown.cancelled(), if outstanding_zero => None,
        };

        let Some(request) = request else {
            break;
        };

        let JoinRequest { origin, handle } = request;
        match join_with_timeout(handle, join_timeout).await {
            JoinOutcome::Joined => {
                attempts.remove(&origin);
                self_handle.outstanding.fetch_sub(1, Ordering::SeqCst);
                tracing::debug!(origin = %origin, "worker thread joined");
            }
            JoinOutcome::StillRunning(handle) => {
                let count = attempts.entry(origin.clone()).or_insert(0);
                *count += 1;
                if *count % WARN_EVERY_N_ATTEMPTS == 0 {
                    tracing::warn!(
                        origin = %origin,
                        attempts = *count,
                        "worker thread still running after repeated join attempts, requeuing"
                    );
                } else {
                    tracing::debug!(origin = %origin, attempts = *count, "worker thread still running, requeuing");
                }
                // Requeue directly onto the channel rather than through
                // `enqueue`: the outstanding count already reflects this
                // worker and must not be double-counted.
                if self_handle.tx.send(JoinRequest { origin, handle }).is_err() {
                    break;
                }
            }
            JoinOutcome::Panicked => {
                attempts.remove(&origin);
                self_handle.outstanding.fetch_sub(1, Ordering::SeqCst);
                tracing::warn!(origin = %origin, "worker thread panicked during execution");
            }
        }
    }
}

enum JoinOutcome {
    Joined,
    StillRunning(std::thread::JoinHandle<()>),
    /// The join itself failed, the structural error case guarded against
    /// with a join-result check rather than letting a panic propagate.
    Panicked,
}

/// Waits up to `timeout` for `handle` to finish, without ever blocking the
/// async scheduler: polls `is_finished()` on an interval, so the common
/// case (already done) resolves on the very first check.
async fn join_with_timeout(
    handle: std::thread::JoinHandle<()>,
    timeout: Duration,
) -> JoinOutcome {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut handle = handle;
    loop {
        if handle.is_finished() {
            return match handle.join() {
                Ok(()) => JoinOutcome::Joined,
                Err(_) => JoinOutcome::Panicked,
            };
        }
        if tokio::time::Instant::now() >= deadline {
            return JoinOutcome::StillRunning(handle);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[cfg(test)]
#[path = "reaper_tests.rs"]
mod tests;
