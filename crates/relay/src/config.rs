//! Relay configuration.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use eyre::WrapErr;
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// Address the HTTP server binds to.
    pub listen_addr: SocketAddr,

    /// Interval between `ping` events on SSE streams, milliseconds.
    pub ping_interval_ms: u64,

    /// How long a durable-stream long poll waits before answering 204,
    /// milliseconds.
    pub poll_timeout_ms: u64,

    /// Capacity of each document's broadcast channel; slow subscribers past
    /// this lag lose frames and must re-sync.
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([127, 0, 0, 1], 4433).into(),
            ping_interval_ms: 15_000,
            poll_timeout_ms: 10_000,
            channel_capacity: 256,
        }
    }
}

impl RelayConfig {
    #[must_use]
    pub const fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    #[must_use]
    pub const fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn load(path: &Path) -> eyre::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read config file {}", path.display()))?;

        toml::from_str(&raw)
            .wrap_err_with(|| format!("failed to parse config file {}", path.display()))
    }
}
