//! External fault-injection control plane.
//!
//! # Data Flow
//! ```text
//! admin API  ──create/delete/toxics──▶ ControlPlane ◀──list (poll)── reload loop
//!                                          │
//!                                          ▼
//!                         backend listen addresses (host:port)
//! ```
//!
//! # Design Decisions
//! - The control plane is the only source of truth for backend membership
//! - Toxic contents are opaque to the proxy; only `listen` matters for routing
//! - One trait, two implementations: the Toxiproxy REST client and an
//!   in-memory registry used by tests and local runs

pub mod memory;
pub mod toxiproxy;

use std::collections::BTreeMap;
use std::future::Future;

use serde::{Deserialize, Serialize};

pub use memory::InMemoryControlPlane;
pub use toxiproxy::ToxiproxyClient;

/// A backend registered with the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backend {
    /// Registration name (the encoded path prefix).
    pub name: String,
    /// Address the control plane listens on for this backend.
    pub listen: String,
    /// Where the control plane sends the (possibly degraded) traffic.
    pub upstream: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub toxics: Vec<Toxic>,
}

fn enabled_by_default() -> bool {
    true
}

/// Parameters for provisioning a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBackend {
    pub name: String,
    pub listen: String,
    pub upstream: String,
    pub enabled: bool,
}

/// A traffic degradation rule. Attributes are passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Toxic {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "downstream")]
    pub stream: String,
    #[serde(default = "full_toxicity")]
    pub toxicity: f32,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

fn downstream() -> String {
    "downstream".to_string()
}

fn full_toxicity() -> f32 {
    1.0
}

#[derive(Debug, thiserror::Error)]
pub enum ControlPlaneError {
    #[error("control plane request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("control plane answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    Conflict(String),

    #[error("control plane unreachable: {0}")]
    Unavailable(String),
}

/// Operations the proxy needs from the control plane.
pub trait ControlPlane: Send + Sync + 'static {
    /// All registered backends keyed by name.
    fn list_backends(
        &self,
    ) -> impl Future<Output = Result<BTreeMap<String, Backend>, ControlPlaneError>> + Send;

    fn backend(&self, name: &str) -> impl Future<Output = Result<Backend, ControlPlaneError>> + Send;

    fn create_backend(
        &self,
        backend: NewBackend,
    ) -> impl Future<Output = Result<Backend, ControlPlaneError>> + Send;

    fn delete_backend(&self, name: &str) -> impl Future<Output = Result<(), ControlPlaneError>> + Send;

    /// Re-enable every backend and drop all toxics.
    fn reset(&self) -> impl Future<Output = Result<(), ControlPlaneError>> + Send;

    fn toxics(&self, backend: &str) -> impl Future<Output = Result<Vec<Toxic>, ControlPlaneError>> + Send;

    fn toxic(
        &self,
        backend: &str,
        toxic: &str,
    ) -> impl Future<Output = Result<Toxic, ControlPlaneError>> + Send;

    fn create_toxic(
        &self,
        backend: &str,
        toxic: Toxic,
    ) -> impl Future<Output = Result<Toxic, ControlPlaneError>> + Send;

    /// Merge `changes` into an existing toxic.
    fn update_toxic(
        &self,
        backend: &str,
        toxic: &str,
        changes: serde_json::Value,
    ) -> impl Future<Output = Result<Toxic, ControlPlaneError>> + Send;

    fn delete_toxic(
        &self,
        backend: &str,
        toxic: &str,
    ) -> impl Future<Output = Result<(), ControlPlaneError>> + Send;

    /// Listen address of a backend by name.
    fn resolve(&self, name: &str) -> impl Future<Output = Result<String, ControlPlaneError>> + Send {
        async move { self.backend(name).await.map(|b| b.listen) }
    }
}
