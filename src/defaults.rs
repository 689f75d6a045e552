// SPDX-License-Identifier: MIT

//! Reference implementations of the broker's external collaborators.
//!
//! A real deployment supplies its own `DeviceMapping`, `DeviceCatalogue`,
//! and `WorkerFactory` backed by whatever device-provisioning and
//! device-driving logic it owns (explicitly out of scope here). These
//! defaults exist so the binary is runnable out of the box, for manual
//! smoke testing against the device listener.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::auth::{Credential, DeviceCatalogue, DeviceMapping, DeviceRecord};
use crate::worker::{Communicator, Worker, WorkerFactory, WorkerMode};

/// On-disk shape for [`BrokerConfig::device_mapping_file`](crate::config::BrokerConfig).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StaticDeviceDirectoryFile {
    #[serde(default)]
    pub known_devices: Vec<String>,
    #[serde(default)]
    pub auths: Vec<Credential>,
}

/// A static, in-memory `DeviceMapping` + `DeviceCatalogue` loaded once at
/// startup from a JSON file. Every known device is also catalogued, so
/// this implementation never distinguishes "not loaded" from "unknown";
/// a real deployment's catalogue and mapping manager are independently
/// populated and do draw that distinction.
pub struct StaticDeviceDirectory {
    known: HashSet<Arc<str>>,
    auths: Vec<Credential>,
}

impl StaticDeviceDirectory {
    pub fn new(file: StaticDeviceDirectoryFile) -> Self {
        Self {
            known: file.known_devices.into_iter().map(Arc::from).collect(),
            auths: file.auths,
        }
    }

    pub fn empty() -> Self {
        Self { known: HashSet::new(), auths: Vec::new() }
    }

    pub async fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let contents = tokio::fs::read_to_string(path).await?;
        let file: StaticDeviceDirectoryFile = serde_json::from_str(&contents)?;
        Ok(Self::new(file))
    }
}

#[async_trait]
impl DeviceMapping for StaticDeviceDirectory {
    async fn known_devices(&self) -> HashSet<Arc<str>> {
        self.known.clone()
    }

    async fn get_auths(&self) -> Vec<Credential> {
        self.auths.clone()
    }
}

#[async_trait]
impl DeviceCatalogue for StaticDeviceDirectory {
    async fn find(&self, origin: &str) -> Option<DeviceRecord> {
        self.known.contains(origin).then(|| DeviceRecord { device_id: origin.to_owned() })
    }

    async fn is_active(&self, _device_id: &str) -> bool {
        true
    }
}

/// A worker that does nothing beyond existing until stopped. Useful as the
/// default factory product and in tests that exercise admission without
/// needing real device-driving behavior.
pub struct EchoWorker {
    communicator: Communicator,
    stopping: AtomicBool,
}

#[async_trait]
impl Worker for EchoWorker {
    fn start(self: Arc<Self>) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            while !self.stopping.load(Ordering::Relaxed) {
                std::thread::sleep(std::time::Duration::from_millis(50));
            }
        })
    }

    fn stop(&self) {
        self.stopping.store(true, Ordering::Relaxed);
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Relaxed)
    }

    fn communicator(&self) -> Communicator {
        self.communicator.clone()
    }
}

pub struct EchoWorkerFactory;

#[async_trait]
impl WorkerFactory for EchoWorkerFactory {
    async fn build(
        &self,
        _origin: Arc<str>,
        _mode: WorkerMode,
        communicator: Communicator,
    ) -> Option<Arc<dyn Worker>> {
        Some(Arc::new(EchoWorker { communicator, stopping: AtomicBool::new(false) }))
    }
}

#[cfg(test)]
#[path = "defaults_tests.rs"]
mod tests;
