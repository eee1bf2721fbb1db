//! Administrative REST API.
//!
//! # Responsibilities
//! - Provision and remove backends for path prefixes on the control plane
//! - Write operator changes straight into the route table
//! - Pass fault-injection rules through to the control plane untouched
//! - Report version, route count and active sessions
//!
//! # Design Decisions
//! - Generic over [`ControlPlane`] so tests can run against the in-memory plane
//! - Table writes are copy-on-write publishes, never in-place mutation

pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use self::handlers::*;
use crate::control::ControlPlane;
use crate::forward::SessionTracker;
use crate::http::request::{ping, HEARTBEAT_PATH};
use crate::http::server::with_common_layers;
use crate::lifecycle::shutdown::signalled;
use crate::routing::{NameCodec, RouteTable};

/// State shared by every admin handler.
#[derive(Clone)]
pub struct AdminState<C> {
    pub control: C,
    pub routes: Arc<RouteTable>,
    pub codec: NameCodec,
    /// Host part of listen addresses for newly provisioned backends.
    pub listen_host: String,
    /// `host:port` the control plane forwards provisioned backends to.
    pub upstream: String,
    pub sessions: SessionTracker,
}

pub fn setup_admin_router<C: ControlPlane + Clone>(state: AdminState<C>) -> Router {
    let router = Router::new()
        .route(HEARTBEAT_PATH, get(ping))
        .route("/status", get(get_status::<C>))
        .route(
            "/routes",
            get(list_routes::<C>)
                .post(create_route::<C>)
                .delete(delete_all_routes::<C>),
        )
        .route("/routes/reset", post(reset_routes::<C>))
        .route("/routes/{route}", get(get_route::<C>).delete(delete_route::<C>))
        .route(
            "/routes/{route}/toxics",
            get(list_toxics::<C>).post(create_toxic::<C>),
        )
        .route(
            "/routes/{route}/toxics/{toxic}",
            get(get_toxic::<C>)
                .post(update_toxic::<C>)
                .delete(delete_toxic::<C>),
        )
        .with_state(state);
    with_common_layers(router)
}

/// Serve the admin API until the shutdown signal fires.
pub async fn run_admin_server(
    router: Router,
    listener: TcpListener,
    shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Admin API starting");
    axum::serve(listener, router)
        .with_graceful_shutdown(signalled(shutdown))
        .await?;
    tracing::info!("Admin API stopped");
    Ok(())
}
