//! HTTP server for the proxy listener.
//!
//! # Responsibilities
//! - Create the Axum router with one catch-all handler
//! - Wire up middleware (request ID, tracing, panic recovery, heartbeat)
//! - Derive each request's cancel signal from the request deadline
//! - Hand every request to the forwarding engine

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, Response},
    middleware,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::forward::{CancelSignal, ClientInfo, Forwarder};
use crate::http::request::{heartbeat, request_id, UuidRequestId, X_REQUEST_ID};
use crate::lifecycle::shutdown::signalled;

/// Application state injected into the proxy handler.
#[derive(Clone)]
pub struct ProxyState {
    pub forwarder: Arc<Forwarder>,
    pub request_timeout: Duration,
}

/// HTTP server for the proxy listener.
pub struct ProxyServer {
    router: Router,
}

impl ProxyServer {
    pub fn new(forwarder: Arc<Forwarder>, request_timeout: Duration) -> Self {
        let state = ProxyState {
            forwarder,
            request_timeout,
        };
        Self {
            router: Self::build_router(state),
        }
    }

    /// The configured router, for serving on a custom listener.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    fn build_router(state: ProxyState) -> Router {
        let router = Router::new()
            .route("/", any(proxy_handler))
            .route("/{*path}", any(proxy_handler))
            .with_state(state)
            .layer(middleware::from_fn(heartbeat));
        with_common_layers(router)
    }

    /// Run the server until the shutdown signal fires.
    pub async fn run(self, listener: TcpListener, shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Proxy server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(signalled(shutdown))
            .await?;

        tracing::info!("Proxy server stopped");
        Ok(())
    }
}

/// Request ID, tracing and panic recovery shared by both listeners.
pub fn with_common_layers(router: Router) -> Router {
    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, UuidRequestId))
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    request_id = %request_id(request),
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }))
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(CatchPanicLayer::new()),
    )
}

async fn proxy_handler(
    State(state): State<ProxyState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response<Body> {
    let cancel = CancelSignal::never().with_timeout(state.request_timeout);
    state
        .forwarder
        .serve(request, ClientInfo::plain(peer), cancel)
        .await
}
