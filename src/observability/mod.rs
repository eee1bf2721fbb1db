//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! forwarding engine, reloader, admin API
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (fmt layer)
//!     → Prometheus scrape endpoint (when enabled)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through every log line of a request via the trace span
//! - Metrics are cheap to record and silently dropped without a recorder

pub mod logging;
pub mod metrics;
