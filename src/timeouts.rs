//! Timeout configuration for session operations.
//!
//! Centralizes the time limits applied to transport establishment and
//! teardown. A zero duration means "no timeout" for that operation.

use std::time::Duration;

/// Timeout configuration for session operations.
///
/// # Examples
///
/// ```rust
/// use relay_link::LinkTimeouts;
/// use std::time::Duration;
///
/// // Defaults (recommended for most cases)
/// let timeouts = LinkTimeouts::default();
///
/// // Custom limits for a high-latency environment
/// let timeouts = LinkTimeouts::builder()
///     .connection_timeout(Duration::from_secs(60))
///     .handshake_timeout(Duration::from_secs(15))
///     .build();
///
/// // Aggressive limits for local development
/// let timeouts = LinkTimeouts::fast();
/// ```
#[derive(Debug, Clone)]
pub struct LinkTimeouts {
    /// Limit on the whole connect attempt: transport construction plus
    /// handshake. Covers TCP, TLS and the session-level handshake exchange.
    /// Default: 10 seconds.
    pub connection_timeout: Duration,

    /// Limit on the session-level handshake reply once the socket is open.
    /// Default: 5 seconds.
    pub handshake_timeout: Duration,

    /// Limit on graceful teardown before the connection is dropped anyway.
    /// Default: 2 seconds.
    pub teardown_timeout: Duration,
}

impl Default for LinkTimeouts {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(5),
            teardown_timeout: Duration::from_secs(2),
        }
    }
}

impl LinkTimeouts {
    /// Create a builder for custom timeout configuration.
    pub fn builder() -> LinkTimeoutsBuilder {
        LinkTimeoutsBuilder::new()
    }

    /// Timeouts optimized for fast local development.
    pub fn fast() -> Self {
        Self {
            connection_timeout: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(2),
            teardown_timeout: Duration::from_secs(1),
        }
    }

    /// Timeouts suitable for high-latency or unreliable networks.
    pub fn relaxed() -> Self {
        Self {
            connection_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(15),
            teardown_timeout: Duration::from_secs(5),
        }
    }

    /// Check whether a duration represents "no timeout".
    pub fn is_no_timeout(duration: Duration) -> bool {
        duration.is_zero()
    }
}

/// Builder for custom [`LinkTimeouts`] configurations.
#[derive(Debug, Clone)]
pub struct LinkTimeoutsBuilder {
    timeouts: LinkTimeouts,
}

impl LinkTimeoutsBuilder {
    fn new() -> Self {
        Self {
            timeouts: LinkTimeouts::default(),
        }
    }

    /// Set the overall connect-attempt timeout. Zero disables it.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connection_timeout = timeout;
        self
    }

    /// Set the handshake reply timeout. Zero disables it.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.handshake_timeout = timeout;
        self
    }

    /// Set the graceful teardown timeout. Zero disables it.
    pub fn teardown_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.teardown_timeout = timeout;
        self
    }

    /// Build the timeout configuration.
    pub fn build(self) -> LinkTimeouts {
        self.timeouts
    }
}
