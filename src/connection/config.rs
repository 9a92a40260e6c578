//! Connection configuration

use std::time::Duration;

use crate::protocol::constants::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, DEFAULT_TEARDOWN_ATTEMPTS,
    DEFAULT_TEARDOWN_BACKOFF,
};

/// Control connection options
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// TCP connect plus handshake must complete within this time
    pub connect_timeout: Duration,

    /// Each control request must be answered within this time
    pub request_timeout: Duration,

    /// First wait for the teardown acknowledgement
    pub teardown_initial_backoff: Duration,

    /// Disconnect attempts before the teardown is abandoned
    pub teardown_max_attempts: u32,

    /// Name sent in the greeting
    pub client_name: String,

    /// Enable TCP_NODELAY
    pub tcp_nodelay: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            teardown_initial_backoff: DEFAULT_TEARDOWN_BACKOFF,
            teardown_max_attempts: DEFAULT_TEARDOWN_ATTEMPTS,
            client_name: concat!("mcam-stream/", env!("CARGO_PKG_VERSION")).to_string(),
            tcp_nodelay: true,
        }
    }
}

impl ConnectionConfig {
    /// Set connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set teardown backoff; `attempts` is at least 1
    pub fn teardown_backoff(mut self, initial: Duration, attempts: u32) -> Self {
        self.teardown_initial_backoff = initial;
        self.teardown_max_attempts = attempts.max(1);
        self
    }

    /// Set client name
    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    /// Upper bound of the time spent waiting for a teardown acknowledgement
    pub fn teardown_budget(&self) -> Duration {
        (0..self.teardown_max_attempts.max(1))
            .map(|i| self.teardown_initial_backoff * 2u32.saturating_pow(i))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();

        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.teardown_max_attempts, DEFAULT_TEARDOWN_ATTEMPTS);
        assert!(config.client_name.starts_with("mcam-stream/"));
        assert!(config.tcp_nodelay);
    }

    #[test]
    fn test_teardown_budget_doubles() {
        let config =
            ConnectionConfig::default().teardown_backoff(Duration::from_millis(10), 3);

        // 10 + 20 + 40
        assert_eq!(config.teardown_budget(), Duration::from_millis(70));
    }

    #[test]
    fn test_teardown_attempts_at_least_one() {
        let config = ConnectionConfig::default().teardown_backoff(Duration::from_millis(5), 0);
        assert_eq!(config.teardown_max_attempts, 1);
    }

    #[test]
    fn test_teardown_budget_with_zero_attempts_field() {
        let mut config = ConnectionConfig::default().teardown_backoff(Duration::from_millis(5), 3);
        config.teardown_max_attempts = 0;

        assert_eq!(config.teardown_budget(), Duration::from_millis(5));
    }

    #[test]
    fn test_builder_chaining() {
        let config = ConnectionConfig::default()
            .connect_timeout(Duration::from_millis(250))
            .request_timeout(Duration::from_millis(100))
            .client_name("viewer");

        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.request_timeout, Duration::from_millis(100));
        assert_eq!(config.client_name, "viewer");
    }
}
