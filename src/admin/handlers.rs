//! Admin API handlers.
//!
//! Route identifiers in paths are registration names (encoded prefixes).

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::control::{Backend, ControlPlane, ControlPlaneError, NewBackend, Toxic};
use crate::http::response::ErrorBody;
use crate::routing::{derived_port, RouteEntry};

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub routes: usize,
    pub active_sessions: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteInfo {
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteView {
    pub route: RouteInfo,
    pub backend: Backend,
}

#[derive(Debug, Deserialize)]
pub struct CreateRoute {
    pub prefix: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("{0}")]
    BadRequest(String),

    #[error("route {0} not found")]
    NotFound(String),

    #[error("route {0} does not exist")]
    Gone(String),

    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),
}

impl AdminError {
    fn status(&self) -> StatusCode {
        match self {
            AdminError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AdminError::NotFound(_) => StatusCode::NOT_FOUND,
            AdminError::Gone(_) => StatusCode::GONE,
            AdminError::ControlPlane(ControlPlaneError::NotFound(_)) => StatusCode::NOT_FOUND,
            AdminError::ControlPlane(ControlPlaneError::Conflict(_))
            | AdminError::ControlPlane(ControlPlaneError::Status { status: 409, .. }) => StatusCode::CONFLICT,
            AdminError::ControlPlane(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Admin request failed");
        }
        let body = ErrorBody {
            status: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type AdminResult<T> = Result<T, AdminError>;

pub async fn get_status<C: ControlPlane + Clone>(State(state): State<AdminState<C>>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        routes: state.routes.load().len(),
        active_sessions: state.sessions.active_count(),
    })
}

/// Every routed prefix the control plane still knows about.
pub async fn list_routes<C: ControlPlane + Clone>(
    State(state): State<AdminState<C>>,
) -> AdminResult<Json<BTreeMap<String, RouteView>>> {
    let backends = state.control.list_backends().await?;
    let snapshot = state.routes.load();

    let views = snapshot
        .entries()
        .into_iter()
        .filter_map(|entry| {
            let backend = backends.get(&state.codec.identifier_for(&entry.prefix))?;
            Some((
                entry.prefix.clone(),
                RouteView {
                    route: RouteInfo {
                        prefix: entry.prefix.clone(),
                    },
                    backend: backend.clone(),
                },
            ))
        })
        .collect();
    Ok(Json(views))
}

fn validate_prefix(prefix: &str, separator: &str) -> AdminResult<()> {
    if prefix.is_empty() {
        return Err(AdminError::BadRequest("prefix must not be empty".into()));
    }
    if !prefix.starts_with('/') {
        return Err(AdminError::BadRequest(format!("prefix '{prefix}' must start with '/'")));
    }
    if prefix.contains(separator) {
        return Err(AdminError::BadRequest(format!(
            "prefix '{prefix}' must not contain the separator '{separator}'"
        )));
    }
    Ok(())
}

/// Provision a backend for a prefix (or adopt the existing one) and route to it.
pub async fn create_route<C: ControlPlane + Clone>(
    State(state): State<AdminState<C>>,
    Json(body): Json<CreateRoute>,
) -> AdminResult<(StatusCode, Json<RouteView>)> {
    validate_prefix(&body.prefix, state.codec.separator())?;

    let name = state.codec.identifier_for(&body.prefix);
    let new = NewBackend {
        listen: format!("{}:{}", state.listen_host, derived_port(&name)),
        name: name.clone(),
        upstream: state.upstream.clone(),
        enabled: true,
    };

    let backend = match state.control.create_backend(new).await {
        Ok(backend) => backend,
        Err(ControlPlaneError::Conflict(_)) => {
            tracing::info!(route = %name, "Backend already provisioned, adopting it");
            match state.control.backend(&name).await {
                Ok(backend) => backend,
                Err(ControlPlaneError::NotFound(_)) => return Err(ControlPlaneError::Conflict(name).into()),
                Err(e) => return Err(e.into()),
            }
        }
        Err(e) => return Err(e.into()),
    };

    state.routes.insert(RouteEntry::new(body.prefix.clone(), backend.listen.clone()));
    tracing::info!(prefix = %body.prefix, listen = %backend.listen, "Route added");

    Ok((
        StatusCode::CREATED,
        Json(RouteView {
            route: RouteInfo { prefix: body.prefix },
            backend,
        }),
    ))
}

pub async fn get_route<C: ControlPlane + Clone>(
    State(state): State<AdminState<C>>,
    Path(route): Path<String>,
) -> AdminResult<Json<RouteView>> {
    let prefix = state.codec.prefix_for(&route);
    if state.routes.load().get(&prefix).is_none() {
        return Err(AdminError::NotFound(route));
    }
    let backend = match state.control.backend(&route).await {
        Ok(backend) => backend,
        Err(ControlPlaneError::NotFound(_)) => return Err(AdminError::NotFound(route)),
        Err(e) => return Err(e.into()),
    };
    Ok(Json(RouteView {
        route: RouteInfo { prefix },
        backend,
    }))
}

pub async fn delete_route<C: ControlPlane + Clone>(
    State(state): State<AdminState<C>>,
    Path(route): Path<String>,
) -> AdminResult<StatusCode> {
    match state.control.delete_backend(&route).await {
        Ok(()) => {}
        Err(ControlPlaneError::NotFound(_)) => return Err(AdminError::Gone(route)),
        Err(e) => return Err(e.into()),
    }
    let prefix = state.codec.prefix_for(&route);
    state.routes.delete(&prefix);
    tracing::info!(prefix = %prefix, "Route deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Remove every registered backend and empty the table.
pub async fn delete_all_routes<C: ControlPlane + Clone>(
    State(state): State<AdminState<C>>,
) -> AdminResult<StatusCode> {
    let backends = state.control.list_backends().await?;
    for name in backends.keys() {
        match state.control.delete_backend(name).await {
            Ok(()) | Err(ControlPlaneError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    state.routes.clear();
    tracing::info!(removed = backends.len(), "All routes deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reset_routes<C: ControlPlane + Clone>(State(state): State<AdminState<C>>) -> AdminResult<StatusCode> {
    state.control.reset().await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_toxics<C: ControlPlane + Clone>(
    State(state): State<AdminState<C>>,
    Path(route): Path<String>,
) -> AdminResult<Json<Vec<Toxic>>> {
    Ok(Json(state.control.toxics(&route).await?))
}

pub async fn create_toxic<C: ControlPlane + Clone>(
    State(state): State<AdminState<C>>,
    Path(route): Path<String>,
    Json(toxic): Json<Toxic>,
) -> AdminResult<Json<Toxic>> {
    Ok(Json(state.control.create_toxic(&route, toxic).await?))
}

pub async fn get_toxic<C: ControlPlane + Clone>(
    State(state): State<AdminState<C>>,
    Path((route, toxic)): Path<(String, String)>,
) -> AdminResult<Json<Toxic>> {
    Ok(Json(state.control.toxic(&route, &toxic).await?))
}

pub async fn update_toxic<C: ControlPlane + Clone>(
    State(state): State<AdminState<C>>,
    Path((route, toxic)): Path<(String, String)>,
    Json(changes): Json<serde_json::Value>,
) -> AdminResult<Json<Toxic>> {
    Ok(Json(state.control.update_toxic(&route, &toxic, changes).await?))
}

pub async fn delete_toxic<C: ControlPlane + Clone>(
    State(state): State<AdminState<C>>,
    Path((route, toxic)): Path<(String, String)>,
) -> AdminResult<StatusCode> {
    state.control.delete_toxic(&route, &toxic).await?;
    Ok(StatusCode::NO_CONTENT)
}
