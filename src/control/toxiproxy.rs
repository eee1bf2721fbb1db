//! Toxiproxy REST client.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::control::{Backend, ControlPlane, ControlPlaneError, NewBackend, Toxic};

#[derive(Debug, Clone)]
pub struct ToxiproxyClient {
    base: String,
    http: reqwest::Client,
}

impl ToxiproxyClient {
    /// Client for the API at `base` (e.g. `http://127.0.0.1:8474`).
    pub fn new(base: impl Into<String>, timeout: Duration) -> Result<Self, ControlPlaneError> {
        let base = base.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder().timeout(timeout).no_proxy().build()?;
        Ok(Self { base, http })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn expect_json<T: DeserializeOwned>(response: Response, what: &str) -> Result<T, ControlPlaneError> {
        let response = Self::check(response, what).await?;
        Ok(response.json().await?)
    }

    async fn check(response: Response, what: &str) -> Result<Response, ControlPlaneError> {
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(ControlPlaneError::NotFound(what.to_string())),
            StatusCode::CONFLICT => Err(ControlPlaneError::Conflict(what.to_string())),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ControlPlaneError::Status {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }
}

impl ControlPlane for ToxiproxyClient {
    async fn list_backends(&self) -> Result<BTreeMap<String, Backend>, ControlPlaneError> {
        let response = self.http.get(self.url("/proxies")).send().await?;
        Self::expect_json(response, "proxies").await
    }

    async fn backend(&self, name: &str) -> Result<Backend, ControlPlaneError> {
        let response = self.http.get(self.url(&format!("/proxies/{name}"))).send().await?;
        Self::expect_json(response, name).await
    }

    async fn create_backend(&self, backend: NewBackend) -> Result<Backend, ControlPlaneError> {
        let response = self.http.post(self.url("/proxies")).json(&backend).send().await?;
        Self::expect_json(response, &backend.name).await
    }

    async fn delete_backend(&self, name: &str) -> Result<(), ControlPlaneError> {
        let response = self.http.delete(self.url(&format!("/proxies/{name}"))).send().await?;
        Self::check(response, name).await.map(drop)
    }

    async fn reset(&self) -> Result<(), ControlPlaneError> {
        let response = self.http.post(self.url("/reset")).send().await?;
        Self::check(response, "reset").await.map(drop)
    }

    async fn toxics(&self, backend: &str) -> Result<Vec<Toxic>, ControlPlaneError> {
        let response = self
            .http
            .get(self.url(&format!("/proxies/{backend}/toxics")))
            .send()
            .await?;
        Self::expect_json(response, backend).await
    }

    async fn toxic(&self, backend: &str, toxic: &str) -> Result<Toxic, ControlPlaneError> {
        let response = self
            .http
            .get(self.url(&format!("/proxies/{backend}/toxics/{toxic}")))
            .send()
            .await?;
        Self::expect_json(response, toxic).await
    }

    async fn create_toxic(&self, backend: &str, toxic: Toxic) -> Result<Toxic, ControlPlaneError> {
        let response = self
            .http
            .post(self.url(&format!("/proxies/{backend}/toxics")))
            .json(&toxic)
            .send()
            .await?;
        Self::expect_json(response, backend).await
    }

    async fn update_toxic(
        &self,
        backend: &str,
        toxic: &str,
        changes: serde_json::Value,
    ) -> Result<Toxic, ControlPlaneError> {
        let response = self
            .http
            .post(self.url(&format!("/proxies/{backend}/toxics/{toxic}")))
            .json(&changes)
            .send()
            .await?;
        Self::expect_json(response, toxic).await
    }

    async fn delete_toxic(&self, backend: &str, toxic: &str) -> Result<(), ControlPlaneError> {
        let response = self
            .http
            .delete(self.url(&format!("/proxies/{backend}/toxics/{toxic}")))
            .send()
            .await?;
        Self::check(response, toxic).await.map(drop)
    }
}
