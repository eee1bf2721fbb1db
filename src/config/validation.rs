//! Configuration validation.
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Pure function: `&ProxyConfig → Result<(), Vec<ValidationError>>`
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use url::Url;

use crate::config::schema::ProxyConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Parse a default upstream URL. Only plain `http` backends are reachable.
pub fn parse_upstream(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("'{raw}' is not an absolute URL: {e}"))?;
    match url.scheme() {
        "http" => {}
        "https" => return Err(format!("'{raw}' uses https, which the backend transport does not speak")),
        other => return Err(format!("'{raw}' has unsupported scheme '{other}'")),
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(format!("'{raw}' has no host"));
    }
    Ok(url)
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mut check_addr = |field: &'static str, value: &str| {
        if value.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(field, format!("'{value}' is not a socket address")));
        }
    };
    check_addr("listener.bind_address", &config.listener.bind_address);
    if config.admin.enabled {
        check_addr("admin.bind_address", &config.admin.bind_address);
    }
    if config.observability.metrics_enabled {
        check_addr("observability.metrics_address", &config.observability.metrics_address);
    }

    if let Some(raw) = config.upstream.default_url() {
        if let Err(message) = parse_upstream(raw) {
            errors.push(ValidationError::new("upstream.default_url", message));
        }
    }

    let control = &config.control_plane;
    if Url::parse(&control.api_url).is_err() {
        errors.push(ValidationError::new(
            "control_plane.api_url",
            format!("'{}' is not an absolute URL", control.api_url),
        ));
    }
    if control.name_separator.is_empty() {
        errors.push(ValidationError::new("control_plane.name_separator", "must not be empty"));
    } else if control.name_separator.contains('/') {
        errors.push(ValidationError::new("control_plane.name_separator", "must not contain '/'"));
    }
    if control.listen_host.trim().is_empty() {
        errors.push(ValidationError::new("control_plane.listen_host", "must not be empty"));
    }
    if control.poll_interval_ms == 0 {
        errors.push(ValidationError::new("control_plane.poll_interval_ms", "must be greater than zero"));
    }
    if control.request_timeout_secs == 0 {
        errors.push(ValidationError::new("control_plane.request_timeout_secs", "must be greater than zero"));
    }

    if config.forwarding.flush_interval_ms == 0 {
        errors.push(ValidationError::new("forwarding.flush_interval_ms", "must be greater than zero"));
    }
    if config.forwarding.response_header_timeout_ms == Some(0) {
        errors.push(ValidationError::new(
            "forwarding.response_header_timeout_ms",
            "must be greater than zero when set",
        ));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than zero"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
