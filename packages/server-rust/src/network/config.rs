//! Transport configuration: keep-alive, connection timeout, and per-request
//! limits applied to the HTTP server.

use std::time::Duration;

use callchain_core::{keys, ConfigProvider};

pub const DEFAULT_KEEPALIVE_TIME: Duration = Duration::from_secs(60);
pub const DEFAULT_KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(3);

/// Raw server-level option, applied after the configuration-derived values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerOption {
    /// HTTP/2 keep-alive ping interval.
    KeepaliveTime(Duration),
    /// How long to wait for a keep-alive ping acknowledgement.
    KeepaliveTimeout(Duration),
    /// How long a new connection may take to send its request headers.
    ConnectionTimeout(Duration),
    /// Maximum concurrent HTTP/2 streams per connection.
    MaxConcurrentStreams(u32),
    /// Maximum accepted request body size in bytes.
    MaxRequestBytes(usize),
}

/// Effective transport settings for one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportParams {
    pub keepalive_time: Duration,
    pub keepalive_timeout: Duration,
    pub connection_timeout: Duration,
    /// `None` leaves the HTTP/2 default in place.
    pub max_concurrent_streams: Option<u32>,
    /// `None` leaves the request body size unbounded.
    pub max_request_bytes: Option<usize>,
}

impl Default for TransportParams {
    fn default() -> Self {
        Self {
            keepalive_time: DEFAULT_KEEPALIVE_TIME,
            keepalive_timeout: DEFAULT_KEEPALIVE_TIMEOUT,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            max_concurrent_streams: None,
            max_request_bytes: None,
        }
    }
}

impl TransportParams {
    /// Reads the keep-alive and connection settings, in seconds.
    ///
    /// Unset, zero or negative values fall back to the defaults.
    #[must_use]
    pub fn from_config(config: &dyn ConfigProvider) -> Self {
        let seconds = |key: &str, default: Duration| {
            u64::try_from(config.get_int(key))
                .ok()
                .filter(|&secs| secs > 0)
                .map_or(default, Duration::from_secs)
        };

        Self {
            keepalive_time: seconds(keys::KEEPALIVE_TIME, DEFAULT_KEEPALIVE_TIME),
            keepalive_timeout: seconds(keys::KEEPALIVE_TIMEOUT, DEFAULT_KEEPALIVE_TIMEOUT),
            connection_timeout: seconds(keys::CONNECTION_TIMEOUT, DEFAULT_CONNECTION_TIMEOUT),
            ..Self::default()
        }
    }

    /// Applies raw options in order; later options win.
    #[must_use]
    pub fn apply(mut self, options: &[ServerOption]) -> Self {
        for option in options {
            match *option {
                ServerOption::KeepaliveTime(d) => self.keepalive_time = d,
                ServerOption::KeepaliveTimeout(d) => self.keepalive_timeout = d,
                ServerOption::ConnectionTimeout(d) => self.connection_timeout = d,
                ServerOption::MaxConcurrentStreams(n) => self.max_concurrent_streams = Some(n),
                ServerOption::MaxRequestBytes(n) => self.max_request_bytes = Some(n),
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use callchain_core::{MapConfig, NullConfig};

    use super::*;

    #[test]
    fn defaults_when_unset() {
        let params = TransportParams::from_config(&NullConfig);
        assert_eq!(params, TransportParams::default());
        assert_eq!(params.keepalive_time, Duration::from_secs(60));
        assert_eq!(params.keepalive_timeout, Duration::from_secs(5));
        assert_eq!(params.connection_timeout, Duration::from_secs(3));
    }

    #[test]
    fn reads_configured_seconds() {
        let config = MapConfig::new()
            .set(keys::KEEPALIVE_TIME, 30)
            .set(keys::KEEPALIVE_TIMEOUT, 10)
            .set(keys::CONNECTION_TIMEOUT, 1);
        let params = TransportParams::from_config(&config);
        assert_eq!(params.keepalive_time, Duration::from_secs(30));
        assert_eq!(params.keepalive_timeout, Duration::from_secs(10));
        assert_eq!(params.connection_timeout, Duration::from_secs(1));
    }

    #[test]
    fn non_positive_values_fall_back() {
        let config = MapConfig::new()
            .set(keys::KEEPALIVE_TIME, 0)
            .set(keys::KEEPALIVE_TIMEOUT, -3);
        let params = TransportParams::from_config(&config);
        assert_eq!(params.keepalive_time, DEFAULT_KEEPALIVE_TIME);
        assert_eq!(params.keepalive_timeout, DEFAULT_KEEPALIVE_TIMEOUT);
    }

    #[test]
    fn raw_options_apply_in_order() {
        let params = TransportParams::default().apply(&[
            ServerOption::KeepaliveTime(Duration::from_secs(20)),
            ServerOption::MaxRequestBytes(1024),
            ServerOption::KeepaliveTime(Duration::from_secs(45)),
            ServerOption::MaxConcurrentStreams(8),
        ]);
        assert_eq!(params.keepalive_time, Duration::from_secs(45));
        assert_eq!(params.max_request_bytes, Some(1024));
        assert_eq!(params.max_concurrent_streams, Some(8));
        assert_eq!(params.connection_timeout, DEFAULT_CONNECTION_TIMEOUT);
    }
}
