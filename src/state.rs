// SPDX-License-Identifier: MIT

//! Shared broker state: the registry, configuration, and collaborator
//! handles every connection handler and exposed control operation closes
//! over.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::{DeviceCatalogue, DeviceMapping};
use crate::config::BrokerConfig;
use crate::reaper::ReaperHandle;
use crate::registry::Registry;
use crate::worker::{Communicator, WorkerFactory};

/// Everything the broker needs for the lifetime of the process, held
/// behind a single `Arc` and cloned into every connection task.
pub struct BrokerState {
    pub config: BrokerConfig,
    pub registry: Registry,
    pub shutdown: CancellationToken,
    pub reaper: ReaperHandle,
    pub mapping: Option<Arc<dyn DeviceMapping>>,
    pub catalogue: Arc<dyn DeviceCatalogue>,
    pub worker_factory: Arc<dyn WorkerFactory>,
}

impl BrokerState {
    pub fn new(
        config: BrokerConfig,
        shutdown: CancellationToken,
        reaper: ReaperHandle,
        mapping: Option<Arc<dyn DeviceMapping>>,
        catalogue: Arc<dyn DeviceCatalogue>,
        worker_factory: Arc<dyn WorkerFactory>,
    ) -> Self {
        Self {
            config,
            registry: Registry::new(),
            shutdown,
            reaper,
            mapping,
            catalogue,
            worker_factory,
        }
    }

    /// `connected_origins`: origins whose entry currently holds an open
    /// transport.
    pub async fn connected_origins(&self) -> Vec<Arc<str>> {
        let mut origins = Vec::new();
        for origin in self.registry.origins().await {
            if let Some(entry) = self.registry.get(&origin).await {
                if entry.has_transport().await {
                    origins.push(origin);
                }
            }
        }
        origins
    }

    /// `communicator_for`: the communicator of the origin's current worker,
    /// if one exists.
    pub async fn communicator_for(&self, origin: &str) -> Option<Communicator> {
        let entry = self.registry.get(origin).await?;
        let worker = entry.worker().await?;
        Some(worker.communicator())
    }

    /// `force_disconnect`: stops the worker and closes the transport
    /// synchronously (the join itself still runs through the reaper, not
    /// inline, per the reaper's non-blocking contract).
    pub async fn force_disconnect(&self, origin: &str) {
        let Some(entry) = self.registry.get(origin).await else {
            return;
        };
        if let Some(worker) = entry.worker().await {
            worker.stop();
        }
        if let Some(task) = entry.take_worker_task().await {
            self.reaper.enqueue(Arc::from(origin), task);
        }
        entry.clear_transport().await;
    }

    pub async fn set_geofix_sleeptime(&self, origin: &str, seconds: u32) -> bool {
        let Some(entry) = self.registry.get(origin).await else {
            return false;
        };
        let Some(worker) = entry.worker().await else {
            return false;
        };
        worker.set_geofix_sleeptime(seconds)
    }

    pub async fn set_job_activated(&self, origin: &str) {
        if let Some(worker) = self.worker_for(origin).await {
            worker.set_job_activated();
        }
    }

    pub async fn set_job_deactivated(&self, origin: &str) {
        if let Some(worker) = self.worker_for(origin).await {
            worker.set_job_deactivated();
        }
    }

    async fn worker_for(&self, origin: &str) -> Option<Arc<dyn crate::worker::Worker>> {
        self.registry.get(origin).await?.worker().await
    }

    /// `stop_server`: sets the shutdown flag, busy-waits for in-flight
    /// admissions to finish, then stops every worker and closes every
    /// transport. Callers are expected to additionally await the reaper
    /// task (spawned alongside `start_server`) to observe full drain.
    pub async fn stop_server(&self) {
        self.shutdown.cancel();

        while !self.registry.admission_quiescent().await {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        }

        for origin in self.registry.origins().await {
            let Some(entry) = self.registry.get(&origin).await else {
                continue;
            };
            if let Some(worker) = entry.worker().await {
                worker.stop();
            }
            if let Some(task) = entry.take_worker_task().await {
                self.reaper.enqueue(origin, task);
            }
            entry.clear_transport().await;
        }
    }
}
