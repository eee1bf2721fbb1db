//! Buffered forwarding: read the whole backend body, then answer.

use std::time::Duration;

use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::Response;
use http_body_util::BodyExt;

use crate::forward::error::ForwardError;
use crate::forward::headers::{copy_headers, remove_hop_headers};
use crate::forward::outbound::OutboundPolicy;
use crate::forward::session::ForwardingSession;
use crate::forward::{round_trip, Forward, HttpClient};

#[derive(Debug, Clone)]
pub struct BufferedForwarder {
    client: HttpClient,
    policy: OutboundPolicy,
    header_timeout: Option<Duration>,
}

impl BufferedForwarder {
    pub fn new(client: HttpClient, policy: OutboundPolicy, header_timeout: Option<Duration>) -> Self {
        Self {
            client,
            policy,
            header_timeout,
        }
    }
}

impl Forward for BufferedForwarder {
    async fn forward(&self, session: ForwardingSession) -> Result<Response<Body>, ForwardError> {
        let ForwardingSession {
            target,
            request,
            client,
            cancel,
            guard,
        } = session;

        let outbound = self.policy.prepare(request, &target, &client)?;
        let response = round_trip(&self.client, outbound, &target, self.header_timeout, &cancel).await?;
        let (parts, body) = response.into_parts();

        let bytes = tokio::select! {
            collected = body.collect() => collected.map_err(|e| ForwardError::ResponseCopy(e.into()))?.to_bytes(),
            cause = cancel.cancelled() => return Err(ForwardError::Cancelled { cause }),
        };

        let mut headers = HeaderMap::with_capacity(parts.headers.len());
        copy_headers(&mut headers, &parts.headers);
        remove_hop_headers(&mut headers);
        if !bytes.is_empty() {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
        }

        tracing::trace!(session_id = %guard.id(), bytes = bytes.len(), "Buffered response copied");

        let mut out = Response::new(Body::from(bytes));
        *out.status_mut() = parts.status;
        *out.headers_mut() = headers;
        Ok(out)
    }
}
