//! Path-prefix routing reverse proxy.
//!
//! Requests are matched against a hot-swappable prefix table whose membership
//! is owned by an external fault-injection control plane, then forwarded in
//! buffered, streaming, or WebSocket mode.

// Core subsystems
pub mod config;
pub mod forward;
pub mod http;
pub mod routing;

// Control plane and operator surface
pub mod admin;
pub mod control;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::schema::ProxyConfig;
pub use forward::Forwarder;
pub use http::ProxyServer;
pub use lifecycle::Shutdown;
