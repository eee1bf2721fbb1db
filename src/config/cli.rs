//! Command-line and environment overrides.
//!
//! Flags fall back to the deployment environment variables, then to the
//! config file, then to built-in defaults.

use std::path::PathBuf;

use clap::Parser;

use crate::config::schema::ProxyConfig;

#[derive(Debug, Clone, Default, Parser)]
#[command(name = "prefix-proxy", version, about = "Path-prefix routing reverse proxy")]
pub struct Cli {
    /// TOML configuration file.
    #[arg(short, long, env = "PROXY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Host both listeners bind to.
    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    /// Proxy listener port.
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Administrative API port.
    #[arg(long, env = "API_PORT")]
    pub api_port: Option<u16>,

    /// Default upstream URL for unmatched requests.
    #[arg(long, env = "DOWNSTREAM_PROXY_URL")]
    pub upstream: Option<String>,

    /// Host of the control plane.
    #[arg(long, env = "TOXY_ADDRESS")]
    pub toxy_address: Option<String>,

    /// Port of the control plane API.
    #[arg(long, env = "TOXY_API_PORT")]
    pub toxy_api_port: Option<u16>,

    /// Separator replacing `/` in registration names.
    #[arg(long, env = "ROUTE_SEPARATOR")]
    pub separator: Option<String>,

    /// Relay responses on a flush interval.
    #[arg(long)]
    pub stream: bool,
}

const DEFAULT_TOXY_API_PORT: u16 = 8474;

impl Cli {
    /// Overlay every flag that was given onto `config`.
    pub fn apply(&self, config: &mut ProxyConfig) {
        if self.host.is_some() || self.port.is_some() {
            config.listener.bind_address =
                override_address(&config.listener.bind_address, self.host.as_deref(), self.port);
        }
        if self.host.is_some() || self.api_port.is_some() {
            config.admin.bind_address =
                override_address(&config.admin.bind_address, self.host.as_deref(), self.api_port);
        }
        if let Some(upstream) = &self.upstream {
            config.upstream.default_url = upstream.clone();
        }
        if self.toxy_address.is_some() || self.toxy_api_port.is_some() {
            let current = url::Url::parse(&config.control_plane.api_url).ok();
            let host = self
                .toxy_address
                .clone()
                .or_else(|| current.as_ref().and_then(|u| u.host_str().map(str::to_string)))
                .unwrap_or_else(|| "127.0.0.1".to_string());
            let port = self
                .toxy_api_port
                .or_else(|| current.as_ref().and_then(|u| u.port()))
                .unwrap_or(DEFAULT_TOXY_API_PORT);
            config.control_plane.api_url = format!("http://{host}:{port}");
            if self.toxy_address.is_some() {
                config.control_plane.listen_host = host;
            }
        }
        if let Some(separator) = &self.separator {
            config.control_plane.name_separator = separator.clone();
        }
        if self.stream {
            config.forwarding.stream = true;
        }
    }
}

/// Replace the host and/or port of a `host:port` string.
fn override_address(current: &str, host: Option<&str>, port: Option<u16>) -> String {
    let (current_host, current_port) = current.rsplit_once(':').unwrap_or((current, "0"));
    let host = host.unwrap_or(current_host);
    match port {
        Some(port) => format!("{host}:{port}"),
        None => format!("{host}:{current_port}"),
    }
}
