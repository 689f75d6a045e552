// SPDX-License-Identifier: MIT

//! Fleetbroker: a device-connection broker. Accepts persistent WebSocket
//! connections from device clients, authenticates each, associates it with
//! a per-device worker running on a dedicated OS thread, and multiplexes
//! command/response traffic between worker logic and the device wire.

pub mod auth;
pub mod codec;
pub mod config;
pub mod defaults;
pub mod entry;
pub mod error;
pub mod reaper;
pub mod registry;
pub mod state;
pub mod transport;
pub mod worker;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::auth::{DeviceCatalogue, DeviceMapping};
use crate::config::BrokerConfig;
use crate::defaults::{EchoWorkerFactory, StaticDeviceDirectory};
use crate::state::BrokerState;
use crate::worker::WorkerFactory;

/// Run the broker until shutdown, using the reference device directory and
/// worker factory described in [`defaults`]. Embedders who need real device
/// provisioning or device-driving logic should use [`run_with`] directly
/// with their own `DeviceMapping`/`DeviceCatalogue`/`WorkerFactory`.
pub async fn run(config: BrokerConfig) -> anyhow::Result<()> {
    let directory = match &config.device_mapping_file {
        Some(path) => Arc::new(StaticDeviceDirectory::load(path).await?),
        None => {
            tracing::warn!("no device mapping file configured; every handshake will be rejected");
            Arc::new(StaticDeviceDirectory::empty())
        }
    };
    let mapping: Arc<dyn DeviceMapping> = directory.clone();
    let catalogue: Arc<dyn DeviceCatalogue> = directory;
    let worker_factory: Arc<dyn WorkerFactory> = Arc::new(EchoWorkerFactory);

    run_with(config, Some(mapping), catalogue, worker_factory).await
}

/// Run the broker with caller-supplied collaborators until shutdown (via
/// `Ctrl+C` or an externally triggered [`BrokerState::stop_server`]).
pub async fn run_with(
    config: BrokerConfig,
    mapping: Option<Arc<dyn DeviceMapping>>,
    catalogue: Arc<dyn DeviceCatalogue>,
    worker_factory: Arc<dyn WorkerFactory>,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();
    let join_timeout = config.join_timeout();

    let (reaper_handle, reaper_rx) = crate::reaper::channel();
    let state = Arc::new(BrokerState::new(
        config,
        shutdown.clone(),
        reaper_handle.clone(),
        mapping,
        catalogue,
        worker_factory,
    ));

    let reaper_task =
        tokio::spawn(crate::reaper::run(reaper_rx, reaper_handle, join_timeout, shutdown.clone()));

    let shutdown_on_signal = state.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown_on_signal.stop_server().await;
        }
    });

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "fleetbroker listening");
    let router = crate::transport::build_router(state.clone());

    axum::serve(listener, router).with_graceful_shutdown(shutdown.clone().cancelled_owned()).await?;

    state.stop_server().await;
    reaper_task.await?;
    Ok(())
}
