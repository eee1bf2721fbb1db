//! Streaming forwarding: relay the backend body as it arrives.
//!
//! A relay task reads backend frames, coalesces them, and hands a chunk to the
//! client every flush interval and at end of stream. The response headers are
//! sent as soon as the backend's arrive.

use std::time::Duration;

use axum::body::Body;
use axum::http::header::HeaderMap;
use axum::http::Response;
use bytes::{Bytes, BytesMut};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};

use crate::forward::error::{BoxError, ForwardError};
use crate::forward::headers::{copy_headers, remove_hop_headers};
use crate::forward::outbound::OutboundPolicy;
use crate::forward::session::{ForwardingSession, SessionGuard};
use crate::forward::{round_trip, Forward, HttpClient};
use crate::observability::metrics;

const RELAY_CHANNEL_CAPACITY: usize = 16;

type Chunk = Result<Bytes, BoxError>;

#[derive(Debug, Clone)]
pub struct StreamingForwarder {
    client: HttpClient,
    policy: OutboundPolicy,
    header_timeout: Option<Duration>,
    flush_interval: Duration,
}

impl StreamingForwarder {
    pub fn new(
        client: HttpClient,
        policy: OutboundPolicy,
        header_timeout: Option<Duration>,
        flush_interval: Duration,
    ) -> Self {
        Self {
            client,
            policy,
            header_timeout,
            flush_interval,
        }
    }
}

impl Forward for StreamingForwarder {
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

        let mut headers = HeaderMap::with_capacity(parts.headers.len());
        copy_headers(&mut headers, &parts.headers);
        remove_hop_headers(&mut headers);

        let (tx, rx) = mpsc::channel(RELAY_CHANNEL_CAPACITY);
        tokio::spawn(relay(body, tx, self.flush_interval, guard));

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        });

        let mut out = Response::new(Body::from_stream(stream));
        *out.status_mut() = parts.status;
        *out.headers_mut() = headers;
        Ok(out)
    }
}

async fn relay(mut body: Incoming, tx: mpsc::Sender<Chunk>, flush_interval: Duration, guard: SessionGuard) {
    let mut pending = BytesMut::new();
    let mut ticker = time::interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            frame = body.frame() => match frame {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        pending.extend_from_slice(&data);
                    }
                }
                Some(Err(e)) => {
                    tracing::error!(session_id = %guard.id(), error = %e, "Error copying streamed response");
                    metrics::record_forward_error("response_copy_error");
                    if !pending.is_empty() {
                        let _ = tx.send(Ok(pending.split().freeze())).await;
                    }
                    let _ = tx.send(Err(e.into())).await;
                    break;
                }
                None => {
                    if !pending.is_empty() {
                        let _ = tx.send(Ok(pending.split().freeze())).await;
                    }
                    break;
                }
            },
            _ = ticker.tick() => {
                if !pending.is_empty() && tx.send(Ok(pending.split().freeze())).await.is_err() {
                    tracing::debug!(session_id = %guard.id(), "Client went away mid-stream");
                    break;
                }
            }
            _ = tx.closed() => {
                tracing::debug!(session_id = %guard.id(), "Client went away mid-stream");
                break;
            }
        }
    }

    drop(guard);
}
