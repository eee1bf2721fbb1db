//! Request-level middleware.
//!
//! # Responsibilities
//! - Generate a UUID v4 `x-request-id` for requests that arrive without one
//! - Answer the `/ping` heartbeat before any routing happens

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

pub const HEARTBEAT_PATH: &str = "/ping";

/// Request IDs as UUID v4.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Request ID of a request, or `"unknown"`.
pub fn request_id<B>(request: &axum::http::Request<B>) -> String {
    request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Heartbeat handler for routers with explicit routes.
pub async fn ping() -> &'static str {
    "."
}

/// Short-circuit `GET|HEAD /ping` with `200 "."`.
pub async fn heartbeat(request: Request, next: Next) -> Response {
    let is_ping = request.uri().path() == HEARTBEAT_PATH
        && (request.method() == Method::GET || request.method() == Method::HEAD);
    if is_ping {
        return (StatusCode::OK, Body::from(".")).into_response();
    }
    next.run(request).await
}
