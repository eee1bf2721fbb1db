//! Configuration schema definitions.
//!
//! All sections default so an empty file (or no file) is a working setup
//! against a Toxiproxy on its default port.

use serde::{Deserialize, Serialize};

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Proxy listener.
    pub listener: ListenerConfig,

    /// Administrative API listener.
    pub admin: AdminConfig,

    /// Where unmatched requests go.
    pub upstream: UpstreamConfig,

    /// The fault-injection service that owns backend membership.
    pub control_plane: ControlPlaneConfig,

    /// Forwarding engine behaviour.
    pub forwarding: ForwardingConfig,

    pub timeouts: TimeoutConfig,

    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1:8475".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Default upstream URL. Empty disables the fallback.
    pub default_url: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            default_url: "http://localhost".to_string(),
        }
    }
}

impl UpstreamConfig {
    pub fn default_url(&self) -> Option<&str> {
        let url = self.default_url.trim();
        (!url.is_empty()).then_some(url)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    /// Base URL of the control plane REST API.
    pub api_url: String,

    /// Host used in listen addresses of newly provisioned backends.
    pub listen_host: String,

    /// Replaces `/` when a path prefix becomes a registration name.
    pub name_separator: String,

    /// How often the route reloader polls.
    pub poll_interval_ms: u64,

    pub request_timeout_secs: u64,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8474".to_string(),
            listen_host: "127.0.0.1".to_string(),
            name_separator: "__".to_string(),
            poll_interval_ms: 500,
            request_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ForwardingConfig {
    /// Relay response bodies on a flush interval instead of buffering them.
    pub stream: bool,

    pub flush_interval_ms: u64,

    /// Keep inbound X-Forwarded-* headers and extend them.
    pub trust_forward_header: bool,

    /// Send the client's Host header to the backend instead of the target's.
    pub pass_host_header: bool,

    /// Value of X-Forwarded-Server.
    pub server_name: String,

    /// Give up on a backend that has not sent response headers in time.
    pub response_header_timeout_ms: Option<u64>,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            stream: false,
            flush_interval_ms: 100,
            trust_forward_header: true,
            pass_host_header: false,
            server_name: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
            response_header_timeout_ms: None,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for a backend to answer an inbound request.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub metrics_enabled: bool,

    /// Prometheus scrape endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
