//! Forwarding engine.
//!
//! # Data Flow
//! ```text
//! inbound request
//!     → engine.rs (resolve target from the route snapshot or default upstream)
//!     → engine.rs (classify: websocket / streaming / buffered)
//!     → outbound.rs + headers.rs (hop stripping, X-Forwarded-* chain, Host)
//!     → buffered.rs | streaming.rs | websocket.rs
//!     → response (or ErrorHandler response on ForwardError)
//! ```
//!
//! # Responsibilities
//! - One [`Forward`] capability with three independent implementations
//! - Cancellation: every wait on a backend races the session's [`CancelSignal`]
//! - Error classification into [`ForwardError`] for the pluggable handler
//!
//! # Design Decisions
//! - A cancelled round trip is abandoned, not aborted: the spawned request
//!   task runs to completion and its result is discarded
//! - No retries; every failure is terminal for its session only
//! - One backend TCP connection per WebSocket session

pub mod buffered;
pub mod engine;
pub mod error;
pub mod headers;
pub mod outbound;
pub mod session;
pub mod streaming;
pub mod websocket;

use std::future::Future;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, Response};
use hyper::body::Incoming;
use hyper_util::client::legacy::{connect::HttpConnector, Client};

pub use buffered::BufferedForwarder;
pub use engine::{BuildError, Forwarder, ForwarderBuilder, ForwarderConfig};
pub use error::{CancelCause, ForwardError};
pub use headers::{HeaderRewriter, RequestRewriter};
pub use session::{
    CancelHandle, CancelSignal, ClientInfo, ForwardingSession, SessionState, SessionTracker,
    StateListener, Target,
};
pub use streaming::StreamingForwarder;
pub use websocket::WebSocketForwarder;

/// Backing transport for buffered and streaming modes.
pub type HttpClient = Client<HttpConnector, Body>;

/// Forward one session to its target.
pub trait Forward: Send + Sync {
    fn forward(
        &self,
        session: ForwardingSession,
    ) -> impl Future<Output = Result<Response<Body>, ForwardError>> + Send;
}

/// Which sub-forwarder handles a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardMode {
    Buffered,
    Streaming,
    WebSocket,
}

impl ForwardMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForwardMode::Buffered => "buffered",
            ForwardMode::Streaming => "streaming",
            ForwardMode::WebSocket => "websocket",
        }
    }
}

/// Send `request` and wait for response headers, racing the cancel signal.
///
/// The request runs in its own task so that cancellation only stops the
/// wait.
pub(crate) async fn round_trip(
    client: &HttpClient,
    request: Request<Body>,
    target: &Target,
    header_timeout: Option<Duration>,
    cancel: &CancelSignal,
) -> Result<Response<Incoming>, ForwardError> {
    let started = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();

    let call = client.request(request);
    let task = tokio::spawn(async move {
        match header_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| limit),
            None => Ok(call.await),
        }
    });

    let joined = tokio::select! {
        joined = task => joined,
        cause = cancel.cancelled() => {
            tracing::debug!(backend = %target, cause = %cause, "Abandoning round trip");
            return Err(ForwardError::Cancelled { cause });
        }
    };

    let response = match joined {
        Err(join) => return Err(ForwardError::transport(target, join)),
        Ok(Err(limit)) => {
            return Err(ForwardError::Timeout {
                target: target.to_string(),
                limit,
            })
        }
        Ok(Ok(Err(e))) if e.is_connect() => return Err(ForwardError::dial(target, e)),
        Ok(Ok(Err(e))) => return Err(ForwardError::transport(target, e)),
        Ok(Ok(Ok(response))) => response,
    };

    let status = response.status();
    let duration_ms = started.elapsed().as_millis() as u64;
    if status.as_u16() < 300 {
        tracing::debug!(method = %method, uri = %uri, status = status.as_u16(), duration_ms, "Round trip");
    } else {
        tracing::info!(method = %method, uri = %uri, status = status.as_u16(), duration_ms, "Round trip");
    }
    Ok(response)
}
