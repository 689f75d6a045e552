// SPDX-License-Identifier: MIT

use clap::Parser;
use tracing::error;

use fleetbroker::config::BrokerConfig;

#[tokio::main]
async fn main() {
    let config = BrokerConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = fleetbroker::run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
