// SPDX-License-Identifier: MIT

//! The client registry: the origin-keyed table of [`ConnectionEntry`]
//! values, plus the admission bookkeeping that arbitrates races between two
//! handshakes for the same origin arriving concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::entry::ConnectionEntry;

/// Why admission was refused for an origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDenied {
    /// Another handshake for the same origin is currently being admitted;
    /// the caller should reject with a randomized backoff to desynchronize
    /// the retry.
    AlreadyAdmitting,
}

/// Origin-keyed table of connection entries plus the in-flight admission
/// set used to serialize concurrent handshakes for the same origin.
///
/// `entries` and `admitting` are separate locks deliberately: `admitting`
/// is only ever held for the brief window between handshake acceptance and
/// the worker/transport install, so it must not block unrelated lookups
/// against `entries`.
pub struct Registry {
    entries: RwLock<HashMap<Arc<str>, Arc<ConnectionEntry>>>,
    admitting: tokio::sync::Mutex<std::collections::HashSet<Arc<str>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            admitting: tokio::sync::Mutex::new(std::collections::HashSet::new()),
        }
    }

    /// `begin_admission`: claims the origin for admission, failing with
    /// [`AdmissionDenied::AlreadyAdmitting`] if another handshake for the
    /// same origin is already mid-admission. Must be paired with
    /// [`Self::end_admission`] regardless of outcome.
    pub async fn begin_admission(&self, origin: &Arc<str>) -> Result<(), AdmissionDenied> {
        let mut admitting = self.admitting.lock().await;
        if admitting.contains(origin) {
            return Err(AdmissionDenied::AlreadyAdmitting);
        }
        admitting.insert(origin.clone());
        Ok(())
    }

    pub async fn end_admission(&self, origin: &Arc<str>) {
        self.admitting.lock().await.remove(origin);
    }

    /// Whether any handshake is currently mid-admission, polled by
    /// shutdown's busy-wait per `spec.md` §4.H.
    pub async fn admission_quiescent(&self) -> bool {
        self.admitting.lock().await.is_empty()
    }

    /// Fetch the entry for `origin`, inserting a fresh one if none exists
    /// yet. The entry persists across transport lifetimes, so this only
    /// allocates once per origin for the lifetime of the broker.
    pub async fn get_or_create(&self, origin: &Arc<str>) -> Arc<ConnectionEntry> {
        if let Some(entry) = self.entries.read().await.get(origin) {
            return entry.clone();
        }
        let mut entries = self.entries.write().await;
        entries
            .entry(origin.clone())
            .or_insert_with(|| Arc::new(ConnectionEntry::new(origin.clone())))
            .clone()
    }

    /// Publishes a freshly built entry under `origin`, unless one was
    /// inserted in the meantime, in which case the existing entry wins and
    /// `entry` is dropped. Safe to call unconditionally because
    /// `begin_admission` already guarantees at most one admission per
    /// origin is in flight, but this still avoids clobbering a concurrent
    /// insert under a different code path (e.g. a direct `get_or_create`).
    pub async fn insert(&self, origin: Arc<str>, entry: Arc<ConnectionEntry>) -> Arc<ConnectionEntry> {
        let mut entries = self.entries.write().await;
        entries.entry(origin).or_insert(entry).clone()
    }

    pub async fn get(&self, origin: &str) -> Option<Arc<ConnectionEntry>> {
        self.entries.read().await.get(origin).cloned()
    }

    /// Snapshot of every known origin, for iteration by the reaper and the
    /// supervisor's shutdown sequence.
    pub async fn origins(&self) -> Vec<Arc<str>> {
        self.entries.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
