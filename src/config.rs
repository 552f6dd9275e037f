//! Configuration for the REST gateway and the realtime session.

use std::time::Duration;

/// Configuration for the REST side: token authority and request gateway.
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Base URL of the REST backend (e.g., "https://api.example.com")
    pub base_url: String,

    /// Device type reported in the anonymous authentication body
    pub device_type: String,

    /// Default timeout applied to endpoints that do not set their own
    pub timeout: Option<Duration>,
}

impl RestConfig {
    /// Create a configuration with the given base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            device_type: "mobile".to_string(),
            timeout: Some(Duration::from_secs(30)),
        }
    }

    /// Set the device type reported during authentication
    pub fn device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = device_type.into();
        self
    }

    /// Set the default request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Disable the default request timeout
    pub fn no_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }
}

/// Configuration for the realtime session.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Socket endpoint URL (e.g., "https://realtime.example.com:4433/rpc")
    pub url: String,

    /// Interval between keepalive pings
    pub ping_interval: Duration,

    /// Whether to skip TLS certificate verification (for development)
    pub dangerous_skip_cert_verify: bool,
}

impl RealtimeConfig {
    /// Create a configuration with the given socket endpoint URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ping_interval: Duration::from_secs(30),
            dangerous_skip_cert_verify: false,
        }
    }

    /// Set the keepalive ping interval
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Skip TLS certificate verification (DANGEROUS - only for development)
    pub fn dangerous_skip_cert_verify(mut self) -> Self {
        self.dangerous_skip_cert_verify = true;
        self
    }
}
