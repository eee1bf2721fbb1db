//! WebSocket forwarding: dial the backend, upgrade both legs, relay bytes.
//!
//! Only the allow-listed client headers reach the backend handshake, and only
//! `Sec-WebSocket-Protocol` and `Set-Cookie` come back from it. After both
//! upgrades complete, two copy loops run until either direction hits EOF or
//! an error; then both connections are closed. No timeout applies to an
//! established session.

use std::time::Duration;

use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::{Method, Request, Response, StatusCode};
use bytes::Bytes;
use http_body_util::Empty;
use hyper::body::Incoming;
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;

use crate::forward::error::ForwardError;
use crate::forward::headers::websocket_dial_headers;
use crate::forward::outbound::{inbound_host, OutboundPolicy};
use crate::forward::session::{ForwardingSession, SessionGuard, Target};
use crate::forward::Forward;
use crate::observability::metrics;

const BACKEND_HANDSHAKE_HEADERS: [header::HeaderName; 2] =
    [header::SEC_WEBSOCKET_PROTOCOL, header::SET_COOKIE];

#[derive(Debug, Clone)]
pub struct WebSocketForwarder {
    policy: OutboundPolicy,
    dial_timeout: Option<Duration>,
}

impl WebSocketForwarder {
    pub fn new(policy: OutboundPolicy, dial_timeout: Option<Duration>) -> Self {
        Self { policy, dial_timeout }
    }

    /// Open a connection to the backend and complete its handshake.
    async fn dial(&self, target: &Target, path: &str, headers: HeaderMap) -> Result<Response<Incoming>, ForwardError> {
        let stream = TcpStream::connect(target.socket_address())
            .await
            .map_err(|e| ForwardError::dial(target, e))?;
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| ForwardError::dial(target, e))?;

        let backend = target.to_string();
        tokio::spawn(async move {
            if let Err(e) = conn.with_upgrades().await {
                tracing::debug!(backend = %backend, error = %e, "Backend websocket connection ended");
            }
        });

        let mut request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .header(header::CONNECTION, "Upgrade")
            .header(header::UPGRADE, "websocket")
            .header(header::SEC_WEBSOCKET_VERSION, "13")
            .header(header::SEC_WEBSOCKET_KEY, generate_key())
            .body(Empty::<Bytes>::new())
            .map_err(|e| ForwardError::BadRequest(e.to_string()))?;
        request.headers_mut().extend(headers);

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| ForwardError::dial(target, e))?;
        if response.status() != StatusCode::SWITCHING_PROTOCOLS {
            return Err(ForwardError::dial(
                target,
                format!("backend answered {} to the websocket handshake", response.status()),
            ));
        }
        Ok(response)
    }
}

impl Forward for WebSocketForwarder {
    async fn forward(&self, session: ForwardingSession) -> Result<Response<Body>, ForwardError> {
        let ForwardingSession {
            target,
            mut request,
            client,
            cancel,
            guard,
        } = session;

        let key = request
            .headers()
            .get(header::SEC_WEBSOCKET_KEY)
            .cloned()
            .ok_or_else(|| ForwardError::Upgrade("missing Sec-WebSocket-Key".into()))?;

        let host = inbound_host(request.headers(), request.uri());
        let mut headers = websocket_dial_headers(request.headers());
        self.policy.apply_headers(&mut headers, &target, &client, host.as_deref());

        let path = request
            .uri()
            .path_and_query()
            .map_or("/", |pq| pq.as_str())
            .to_string();
        let client_upgrade = hyper::upgrade::on(&mut request);

        let dial = async {
            match self.dial_timeout {
                Some(limit) => tokio::time::timeout(limit, self.dial(&target, &path, headers))
                    .await
                    .map_err(|_| ForwardError::Timeout {
                        target: target.to_string(),
                        limit,
                    })?,
                None => self.dial(&target, &path, headers).await,
            }
        };
        let mut backend_response = tokio::select! {
            dialed = dial => dialed?,
            cause = cancel.cancelled() => return Err(ForwardError::Cancelled { cause }),
        };
        let backend_upgrade = hyper::upgrade::on(&mut backend_response);

        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
        let out = response.headers_mut();
        out.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
        out.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        let accept = HeaderValue::from_str(&derive_accept_key(key.as_bytes()))
            .map_err(|e| ForwardError::Upgrade(e.to_string()))?;
        out.insert(header::SEC_WEBSOCKET_ACCEPT, accept);
        for name in BACKEND_HANDSHAKE_HEADERS {
            for value in backend_response.headers().get_all(&name) {
                out.append(name.clone(), value.clone());
            }
        }

        tracing::debug!(session_id = %guard.id(), backend = %target, "Websocket handshake complete");

        tokio::spawn(async move {
            match tokio::try_join!(client_upgrade, backend_upgrade) {
                Ok((client_io, backend_io)) => relay(client_io, backend_io, guard).await,
                Err(e) => {
                    tracing::error!(session_id = %guard.id(), error = %e, "Websocket upgrade failed");
                    metrics::record_forward_error("upgrade_failure");
                }
            }
        });

        Ok(response)
    }
}

async fn relay(client: Upgraded, backend: Upgraded, guard: SessionGuard) {
    let (direction, result) = pipe(TokioIo::new(client), TokioIo::new(backend)).await;
    match result {
        Ok(bytes) => {
            tracing::debug!(session_id = %guard.id(), direction, bytes, "Websocket session finished");
        }
        Err(e) => {
            tracing::debug!(session_id = %guard.id(), direction, error = %e, "Websocket session ended with error");
        }
    }
    metrics::record_websocket_session();
}

/// Copy bytes both ways until one direction stops, then close both write halves.
///
/// Returns the direction that finished first with its outcome.
pub async fn pipe<C, B>(client: C, backend: B) -> (&'static str, std::io::Result<u64>)
where
    C: AsyncRead + AsyncWrite,
    B: AsyncRead + AsyncWrite,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut backend_read, mut backend_write) = tokio::io::split(backend);

    let outcome = tokio::select! {
        result = tokio::io::copy(&mut client_read, &mut backend_write) => ("client_to_backend", result),
        result = tokio::io::copy(&mut backend_read, &mut client_write) => ("backend_to_client", result),
    };

    let _ = client_write.shutdown().await;
    let _ = backend_write.shutdown().await;
    outcome
}
