//! Timeout configuration for zk-link sessions.
//!
//! Centralizes the connection-establishment timeouts and the heartbeat
//! interval that governs session liveness.

use std::time::Duration;

/// Timeout configuration for a zk-link session.
///
/// # Examples
///
/// ```rust
/// use zk_link::ZkLinkTimeouts;
/// use std::time::Duration;
///
/// // Defaults (recommended for most cases)
/// let timeouts = ZkLinkTimeouts::default();
///
/// // Custom heartbeat cadence
/// let timeouts = ZkLinkTimeouts::builder()
///     .heartbeat_interval(Duration::from_secs(5))
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ZkLinkTimeouts {
    /// Timeout for establishing the TCP connection.
    /// Default: 10 seconds
    pub connection_timeout: Duration,

    /// Timeout for the session handshake exchange after connecting.
    /// Default: 10 seconds
    pub handshake_timeout: Duration,

    /// Interval between keep-alive heartbeats. Must stay below half the
    /// negotiated session timeout; the engine clamps it if it does not.
    /// Default: 10 seconds
    pub heartbeat_interval: Duration,
}

impl Default for ZkLinkTimeouts {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

impl ZkLinkTimeouts {
    /// Create a new builder for custom timeout configuration.
    pub fn builder() -> ZkLinkTimeoutsBuilder {
        ZkLinkTimeoutsBuilder::new()
    }

    /// Timeouts optimized for local development: short connect windows,
    /// default heartbeat cadence.
    pub fn fast() -> Self {
        Self {
            connection_timeout: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(10),
        }
    }

    /// Timeouts for tests that need heartbeat activity on a short clock.
    pub fn for_testing(heartbeat_ms: u64) -> Self {
        Self {
            connection_timeout: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(2),
            heartbeat_interval: Duration::from_millis(heartbeat_ms),
        }
    }
}

/// Builder for creating custom [`ZkLinkTimeouts`] configurations.
#[derive(Debug, Clone)]
pub struct ZkLinkTimeoutsBuilder {
    timeouts: ZkLinkTimeouts,
}

impl ZkLinkTimeoutsBuilder {
    fn new() -> Self {
        Self {
            timeouts: ZkLinkTimeouts::default(),
        }
    }

    /// Set the TCP connection timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connection_timeout = timeout;
        self
    }

    /// Set the handshake timeout.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.handshake_timeout = timeout;
        self
    }

    /// Set the heartbeat interval.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.timeouts.heartbeat_interval = interval;
        self
    }

    /// Build the timeout configuration.
    pub fn build(self) -> ZkLinkTimeouts {
        self.timeouts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let timeouts = ZkLinkTimeouts::default();
        assert_eq!(timeouts.connection_timeout, Duration::from_secs(10));
        assert_eq!(timeouts.heartbeat_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_builder() {
        let timeouts = ZkLinkTimeouts::builder()
            .connection_timeout(Duration::from_secs(3))
            .heartbeat_interval(Duration::from_millis(500))
            .build();
        assert_eq!(timeouts.connection_timeout, Duration::from_secs(3));
        assert_eq!(timeouts.heartbeat_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_for_testing_preset() {
        let timeouts = ZkLinkTimeouts::for_testing(100);
        assert_eq!(timeouts.heartbeat_interval, Duration::from_millis(100));
        assert!(timeouts.connection_timeout <= Duration::from_secs(2));
    }
}
