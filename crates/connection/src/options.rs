//! Connection tuning knobs.

use std::time::Duration;

/// Configuration for one [`crate::Connection`].
///
/// A zero duration disables the corresponding behavior where noted.
#[derive(Clone, Debug)]
pub struct ConnectionOptions {
    /// Consecutive failed connect attempts before the connection parks in a
    /// terminal errored state.
    pub max_reconnect_attempts: u32,

    /// First reconnect delay; doubles each consecutive failure.
    pub initial_reconnect_delay: Duration,

    /// Ceiling for the backoff sequence.
    pub max_backoff_time: Duration,

    /// Interval between outbound heartbeat pings while connected (zero
    /// disables the heartbeat).
    pub heartbeat_interval: Duration,

    /// Close and reconnect when nothing has been received for this long
    /// (zero disables the watchdog).
    pub message_reconnect_timeout: Duration,

    /// How long the preferred transport may take to signal success before
    /// the attempt moves on to the fallback.
    pub websocket_timeout: Duration,

    /// Initial online indicator; reconnection is suspended while offline.
    pub is_online: bool,

    /// Connect immediately on construction.
    pub connect: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 10,
            initial_reconnect_delay: Duration::from_millis(100),
            max_backoff_time: Duration::from_secs(30),
            heartbeat_interval: Duration::ZERO,
            message_reconnect_timeout: Duration::from_secs(30),
            websocket_timeout: Duration::from_secs(2),
            is_online: true,
            connect: true,
        }
    }
}

impl ConnectionOptions {
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub fn with_message_reconnect_timeout(mut self, timeout: Duration) -> Self {
        self.message_reconnect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn without_auto_connect(mut self) -> Self {
        self.connect = false;
        self
    }

    #[must_use]
    pub fn starting_offline(mut self) -> Self {
        self.is_online = false;
        self
    }
}
