// SPDX-License-Identifier: MIT

/// Configuration for the device connection broker.
#[derive(Debug, Clone, clap::Args)]
pub struct BrokerConfig {
    /// Host to bind the device listener on.
    #[arg(long, default_value = "0.0.0.0", env = "BROKER_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8080, env = "BROKER_PORT")]
    pub port: u16,

    /// Maximum inbound frame size in bytes (default 32 MiB).
    #[arg(long, default_value_t = 33_554_432, env = "BROKER_MAX_FRAME_SIZE")]
    pub max_frame_size: usize,

    /// Close-handshake timeout in seconds.
    #[arg(long, default_value_t = 10, env = "BROKER_CLOSE_TIMEOUT_SECS")]
    pub close_timeout_secs: u64,

    /// Per-read timeout on the receive loop, in seconds.
    #[arg(long, default_value_t = 4, env = "BROKER_READ_TIMEOUT_SECS")]
    pub read_timeout_secs: u64,

    /// Default timeout for worker-initiated requests, in seconds.
    #[arg(long, default_value_t = 30, env = "BROKER_COMMAND_TIMEOUT_SECS")]
    pub command_timeout_secs: u64,

    /// Lower bound of the randomized rejection backoff, in seconds.
    #[arg(long, default_value_t = 3, env = "BROKER_BACKOFF_MIN_SECS")]
    pub backoff_min_secs: u64,

    /// Upper bound of the randomized rejection backoff, in seconds.
    #[arg(long, default_value_t = 15, env = "BROKER_BACKOFF_MAX_SECS")]
    pub backoff_max_secs: u64,

    /// Bound the reaper waits for a single join attempt before requeuing.
    #[arg(long, default_value_t = 10, env = "BROKER_JOIN_TIMEOUT_SECS")]
    pub join_timeout_secs: u64,

    /// Path to a JSON file describing known devices and optional basic-auth
    /// credentials (see [`crate::defaults::StaticDeviceDirectory`]). Omit to
    /// run with no known devices, which rejects every handshake. Suitable
    /// only when a caller supplies its own `DeviceMapping`/`DeviceCatalogue`.
    #[arg(long, env = "BROKER_DEVICE_MAPPING_FILE")]
    pub device_mapping_file: Option<std::path::PathBuf>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8080,
            max_frame_size: 33_554_432,
            close_timeout_secs: 10,
            read_timeout_secs: 4,
            command_timeout_secs: 30,
            backoff_min_secs: 3,
            backoff_max_secs: 15,
            join_timeout_secs: 10,
            device_mapping_file: None,
        }
    }
}

impl BrokerConfig {
    pub fn read_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.read_timeout_secs)
    }

    pub fn command_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.command_timeout_secs)
    }

    pub fn close_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.close_timeout_secs)
    }

    pub fn join_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.join_timeout_secs)
    }

    /// Uniform backoff range `[min, max)` seconds for desynchronizing rejected
    /// clients' reconnect attempts.
    pub fn backoff_range(&self) -> std::ops::Range<f64> {
        self.backoff_min_secs as f64..self.backoff_max_secs as f64
    }
}
