//! In-process control plane.
//!
//! Keeps registrations in a map and never touches the network. Listen
//! addresses are taken at face value, so tests can point a "backend" straight
//! at a real server.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::control::{Backend, ControlPlane, ControlPlaneError, NewBackend, Toxic};

#[derive(Debug, Clone, Default)]
pub struct InMemoryControlPlane {
    backends: Arc<Mutex<BTreeMap<String, Backend>>>,
    unreachable: Arc<AtomicBool>,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `Unavailable` until switched back.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Register or replace a backend directly.
    pub fn put(&self, name: &str, listen: &str) {
        let backend = Backend {
            name: name.to_string(),
            listen: listen.to_string(),
            upstream: String::new(),
            enabled: true,
            toxics: Vec::new(),
        };
        if let Ok(mut backends) = self.backends.lock() {
            backends.insert(name.to_string(), backend);
        }
    }

    fn registry(&self) -> Result<MutexGuard<'_, BTreeMap<String, Backend>>, ControlPlaneError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ControlPlaneError::Unavailable("in-memory control plane switched off".into()));
        }
        self.backends
            .lock()
            .map_err(|_| ControlPlaneError::Unavailable("registry lock poisoned".into()))
    }
}

impl ControlPlane for InMemoryControlPlane {
    async fn list_backends(&self) -> Result<BTreeMap<String, Backend>, ControlPlaneError> {
        Ok(self.registry()?.clone())
    }

    async fn backend(&self, name: &str) -> Result<Backend, ControlPlaneError> {
        self.registry()?
            .get(name)
            .cloned()
            .ok_or_else(|| ControlPlaneError::NotFound(name.to_string()))
    }

    async fn create_backend(&self, new: NewBackend) -> Result<Backend, ControlPlaneError> {
        let mut backends = self.registry()?;
        if backends.contains_key(&new.name) {
            return Err(ControlPlaneError::Conflict(new.name));
        }
        if let Some(holder) = backends.values().find(|b| b.listen == new.listen) {
            return Err(ControlPlaneError::Status {
                status: 409,
                body: format!("listen address {} already used by {}", new.listen, holder.name),
            });
        }
        let backend = Backend {
            name: new.name.clone(),
            listen: new.listen,
            upstream: new.upstream,
            enabled: new.enabled,
            toxics: Vec::new(),
        };
        backends.insert(new.name, backend.clone());
        Ok(backend)
    }

    async fn delete_backend(&self, name: &str) -> Result<(), ControlPlaneError> {
        self.registry()?
            .remove(name)
            .map(drop)
            .ok_or_else(|| ControlPlaneError::NotFound(name.to_string()))
    }

    async fn reset(&self) -> Result<(), ControlPlaneError> {
        for backend in self.registry()?.values_mut() {
            backend.enabled = true;
            backend.toxics.clear();
        }
        Ok(())
    }

    async fn toxics(&self, backend: &str) -> Result<Vec<Toxic>, ControlPlaneError> {
        self.backend(backend).await.map(|b| b.toxics)
    }

    async fn toxic(&self, backend: &str, toxic: &str) -> Result<Toxic, ControlPlaneError> {
        self.backend(backend)
            .await?
            .toxics
            .into_iter()
            .find(|t| t.name == toxic)
            .ok_or_else(|| ControlPlaneError::NotFound(toxic.to_string()))
    }

    async fn create_toxic(&self, backend: &str, mut toxic: Toxic) -> Result<Toxic, ControlPlaneError> {
        let mut backends = self.registry()?;
        let entry = backends
            .get_mut(backend)
            .ok_or_else(|| ControlPlaneError::NotFound(backend.to_string()))?;
        if toxic.name.is_empty() {
            toxic.name = format!("{}_{}", toxic.kind, toxic.stream);
        }
        if entry.toxics.iter().any(|t| t.name == toxic.name) {
            return Err(ControlPlaneError::Conflict(toxic.name));
        }
        entry.toxics.push(toxic.clone());
        Ok(toxic)
    }

    async fn update_toxic(
        &self,
        backend: &str,
        toxic: &str,
        changes: serde_json::Value,
    ) -> Result<Toxic, ControlPlaneError> {
        let mut backends = self.registry()?;
        let existing = backends
            .get_mut(backend)
            .ok_or_else(|| ControlPlaneError::NotFound(backend.to_string()))?
            .toxics
            .iter_mut()
            .find(|t| t.name == toxic)
            .ok_or_else(|| ControlPlaneError::NotFound(toxic.to_string()))?;

        if let Some(toxicity) = changes.get("toxicity").and_then(|v| v.as_f64()) {
            existing.toxicity = toxicity as f32;
        }
        if let Some(patch) = changes.get("attributes") {
            let merged = match (&existing.attributes, patch) {
                (serde_json::Value::Object(current), serde_json::Value::Object(patch)) => {
                    let mut merged = current.clone();
                    for (key, value) in patch {
                        merged.insert(key.clone(), value.clone());
                    }
                    serde_json::Value::Object(merged)
                }
                _ => patch.clone(),
            };
            existing.attributes = merged;
        }
        Ok(existing.clone())
    }

    async fn delete_toxic(&self, backend: &str, toxic: &str) -> Result<(), ControlPlaneError> {
        let mut backends = self.registry()?;
        let entry = backends
            .get_mut(backend)
            .ok_or_else(|| ControlPlaneError::NotFound(backend.to_string()))?;
        let before = entry.toxics.len();
        entry.toxics.retain(|t| t.name != toxic);
        if entry.toxics.len() == before {
            return Err(ControlPlaneError::NotFound(toxic.to_string()));
        }
        Ok(())
    }
}
