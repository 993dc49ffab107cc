//! Connection configuration.

use std::time::Duration;

use crate::types::ReconnectMode;

/// Options fixed for the lifetime of a connect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Idle-debounce window armed by queries that request it.
    pub max_idle: Duration,
    /// Upper bound on scheduled reconnect attempts.
    pub max_retries: u32,
    /// Delay before a scheduled reconnect dials again.
    pub connect_cooldown: Duration,
    /// Period of the phone-probe interval.
    pub phone_response_interval: Duration,
    /// Ask the server to displace a concurrent session during login.
    pub always_use_takeover: bool,
    /// Reconnect policy after unexpected disconnects.
    pub reconnect_mode: ReconnectMode,
    /// How long `wait_for_connection` blocks. `None` waits forever; a zero
    /// duration fails immediately with code 428.
    pub pending_request_timeout: Option<Duration>,
    /// Capture sent and received frames in the ring log.
    pub log_messages: bool,
    /// Capacity of the ring log.
    pub max_cached_messages: usize,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            max_idle: Duration::from_secs(60),
            max_retries: 10,
            connect_cooldown: Duration::from_secs(4),
            phone_response_interval: Duration::from_secs(15),
            always_use_takeover: true,
            reconnect_mode: ReconnectMode::OnAllErrors,
            pending_request_timeout: None,
            log_messages: false,
            max_cached_messages: 50,
        }
    }
}

impl ConnectOptions {
    /// Override the idle-debounce window.
    pub fn with_max_idle(mut self, value: Duration) -> Self {
        self.max_idle = value;
        self
    }

    /// Override the reconnect attempt bound.
    pub fn with_max_retries(mut self, value: u32) -> Self {
        self.max_retries = value;
        self
    }

    /// Override the reconnect cooldown.
    pub fn with_connect_cooldown(mut self, value: Duration) -> Self {
        self.connect_cooldown = value;
        self
    }

    /// Override the phone-probe period.
    pub fn with_phone_response_interval(mut self, value: Duration) -> Self {
        self.phone_response_interval = value;
        self
    }

    /// Override the reconnect policy.
    pub fn with_reconnect_mode(mut self, value: ReconnectMode) -> Self {
        self.reconnect_mode = value;
        self
    }

    /// Override how long `wait_for_connection` blocks.
    pub fn with_pending_request_timeout(mut self, value: Option<Duration>) -> Self {
        self.pending_request_timeout = value;
        self
    }

    /// Enable the frame ring log.
    pub fn with_log_messages(mut self, value: bool) -> Self {
        self.log_messages = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides() {
        let opts = ConnectOptions::default()
            .with_max_idle(Duration::from_millis(30))
            .with_reconnect_mode(ReconnectMode::Off)
            .with_pending_request_timeout(Some(Duration::ZERO));

        assert_eq!(opts.max_idle, Duration::from_millis(30));
        assert_eq!(opts.reconnect_mode, ReconnectMode::Off);
        assert_eq!(opts.pending_request_timeout, Some(Duration::ZERO));
        assert_eq!(opts.max_retries, 10);
    }
}
