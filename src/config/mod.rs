//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → cli.rs (flags and environment override file values)
//!     → validation.rs (semantic checks, all errors at once)
//!     → ProxyConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; routes change through the control plane
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod cli;
pub mod loader;
pub mod schema;
pub mod validation;

pub use cli::Cli;
pub use loader::{load_config, read_config, ConfigError};
pub use schema::{
    AdminConfig, ControlPlaneConfig, ForwardingConfig, ListenerConfig, ObservabilityConfig,
    ProxyConfig, TimeoutConfig, UpstreamConfig,
};
pub use validation::{parse_upstream, validate_config, ValidationError};
