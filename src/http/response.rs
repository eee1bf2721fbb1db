//! Error responses for failed forwarding sessions.

use std::fmt;

use axum::body::Body;
use axum::http::header::{self, HeaderValue};
use axum::http::Response;
use serde::Serialize;

use crate::forward::ForwardError;

/// Turns a forwarding failure into the client's response. Must not panic.
pub trait ErrorHandler: Send + Sync + fmt::Debug {
    fn handle(&self, err: &ForwardError) -> Response<Body>;
}

/// JSON body shared by the proxy and admin error responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: String,
    pub message: String,
}

/// Answers with the error's default status and a JSON body.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonErrorHandler;

impl ErrorHandler for JsonErrorHandler {
    fn handle(&self, err: &ForwardError) -> Response<Body> {
        let status = err.status();
        let body = ErrorBody {
            status: status.canonical_reason().unwrap_or("Error").to_string(),
            message: err.to_string(),
        };
        let json = serde_json::to_vec(&body).unwrap_or_default();

        let mut response = Response::new(Body::from(json));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}
