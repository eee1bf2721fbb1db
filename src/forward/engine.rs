//! Target resolution and dispatch.
//!
//! The engine owns no routing state of its own: every request takes the
//! snapshot active at lookup time, resolves a [`Target`], and hands a
//! [`ForwardingSession`] to exactly one sub-forwarder.

use std::borrow::Cow;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::uri::Authority;
use axum::http::{Request, Response};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use percent_encoding::percent_decode_str;
use url::Url;

use crate::config::{parse_upstream, ProxyConfig};
use crate::forward::buffered::BufferedForwarder;
use crate::forward::error::{CancelCause, ForwardError};
use crate::forward::headers::{is_websocket_upgrade, HeaderRewriter, RequestRewriter};
use crate::forward::outbound::OutboundPolicy;
use crate::forward::session::{
    CancelSignal, ClientInfo, ForwardingSession, SessionTracker, StateListener, Target,
};
use crate::forward::streaming::StreamingForwarder;
use crate::forward::websocket::WebSocketForwarder;
use crate::forward::{Forward, ForwardMode};
use crate::http::response::{ErrorHandler, JsonErrorHandler};
use crate::observability::metrics;
use crate::routing::RouteTable;

/// Everything the engine needs, validated once by [`ForwarderBuilder::build`].
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Where unmatched requests go; `None` answers them with an error.
    pub default_upstream: Option<Url>,
    pub stream: bool,
    pub flush_interval: Duration,
    pub pass_host_header: bool,
    pub trust_forward_header: bool,
    pub server_name: String,
    pub response_header_timeout: Option<Duration>,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            default_upstream: None,
            stream: false,
            flush_interval: Duration::from_millis(100),
            pass_host_header: false,
            trust_forward_header: true,
            server_name: String::new(),
            response_header_timeout: None,
        }
    }
}

impl ForwarderConfig {
    pub fn from_proxy_config(config: &ProxyConfig) -> Result<Self, BuildError> {
        let default_upstream = config
            .upstream
            .default_url()
            .map(|raw| parse_upstream(raw).map_err(BuildError::InvalidUpstream))
            .transpose()?;
        let forwarding = &config.forwarding;
        Ok(Self {
            default_upstream,
            stream: forwarding.stream,
            flush_interval: Duration::from_millis(forwarding.flush_interval_ms),
            pass_host_header: forwarding.pass_host_header,
            trust_forward_header: forwarding.trust_forward_header,
            server_name: forwarding.server_name.clone(),
            response_header_timeout: forwarding.response_header_timeout_ms.map(Duration::from_millis),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid default upstream: {0}")]
    InvalidUpstream(String),

    #[error("flush interval must be greater than zero")]
    ZeroFlushInterval,
}

/// Decoded form of a request path, used for route lookup only.
fn lookup_path(raw: &str) -> Cow<'_, str> {
    percent_decode_str(raw).decode_utf8_lossy()
}

/// `host:port` of an http URL, defaulting the port for the scheme.
fn authority_of(url: &Url) -> Result<Authority, BuildError> {
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| BuildError::InvalidUpstream(format!("'{url}' has no host")))?;
    let port = url.port_or_known_default().unwrap_or(80);
    Authority::from_str(&format!("{host}:{port}"))
        .map_err(|e| BuildError::InvalidUpstream(format!("'{url}': {e}")))
}

pub struct ForwarderBuilder {
    routes: Arc<RouteTable>,
    config: ForwarderConfig,
    rewriter: Option<Arc<dyn RequestRewriter>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    state_listener: Option<Arc<dyn StateListener>>,
}

impl ForwarderBuilder {
    /// Replace the default X-Forwarded-* rewriter.
    pub fn rewriter(mut self, rewriter: Arc<dyn RequestRewriter>) -> Self {
        self.rewriter = Some(rewriter);
        self
    }

    pub fn error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    pub fn state_listener(mut self, listener: Arc<dyn StateListener>) -> Self {
        self.state_listener = Some(listener);
        self
    }

    pub fn build(self) -> Result<Forwarder, BuildError> {
        let config = self.config;
        if config.flush_interval.is_zero() {
            return Err(BuildError::ZeroFlushInterval);
        }
        let default_target = match &config.default_upstream {
            Some(url) if url.scheme() == "http" => Some(authority_of(url)?),
            Some(url) => {
                return Err(BuildError::InvalidUpstream(format!(
                    "'{url}' must use the http scheme"
                )))
            }
            None => None,
        };

        let rewriter = self.rewriter.unwrap_or_else(|| {
            Arc::new(HeaderRewriter::new(
                config.trust_forward_header,
                config.server_name.clone(),
            ))
        });
        let policy = OutboundPolicy::new(rewriter, config.pass_host_header);
        let client: Client<HttpConnector, Body> = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Ok(Forwarder {
            routes: self.routes,
            default_target,
            stream: config.stream,
            buffered: BufferedForwarder::new(client.clone(), policy.clone(), config.response_header_timeout),
            streaming: StreamingForwarder::new(
                client,
                policy.clone(),
                config.response_header_timeout,
                config.flush_interval,
            ),
            websocket: WebSocketForwarder::new(policy, config.response_header_timeout),
            error_handler: self.error_handler.unwrap_or_else(|| Arc::new(JsonErrorHandler)),
            sessions: SessionTracker::new(self.state_listener),
        })
    }
}

/// The forwarding engine.
#[derive(Debug)]
pub struct Forwarder {
    routes: Arc<RouteTable>,
    default_target: Option<Authority>,
    stream: bool,
    buffered: BufferedForwarder,
    streaming: StreamingForwarder,
    websocket: WebSocketForwarder,
    error_handler: Arc<dyn ErrorHandler>,
    sessions: SessionTracker,
}

impl Forwarder {
    pub fn builder(routes: Arc<RouteTable>, config: ForwarderConfig) -> ForwarderBuilder {
        ForwarderBuilder {
            routes,
            config,
            rewriter: None,
            error_handler: None,
            state_listener: None,
        }
    }

    /// Longest-prefix match in the active snapshot, else the default upstream.
    pub fn resolve(&self, path: &str) -> Option<Target> {
        let snapshot = self.routes.load();
        if let Some(entry) = snapshot.longest_prefix_match(path) {
            match Authority::from_str(&entry.backend_address) {
                Ok(authority) => return Some(Target::new(authority, Some(entry.prefix.clone()))),
                Err(e) => tracing::warn!(
                    prefix = %entry.prefix,
                    backend = %entry.backend_address,
                    error = %e,
                    "Unusable backend address, falling back to default upstream"
                ),
            }
        }
        self.default_target.clone().map(|authority| Target::new(authority, None))
    }

    pub fn classify<B>(&self, request: &Request<B>) -> ForwardMode {
        if is_websocket_upgrade(request.headers()) {
            ForwardMode::WebSocket
        } else if self.stream {
            ForwardMode::Streaming
        } else {
            ForwardMode::Buffered
        }
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    /// Forward one request and produce the client's response.
    pub async fn serve(&self, request: Request<Body>, client: ClientInfo, cancel: CancelSignal) -> Response<Body> {
        let started = Instant::now();
        let mode = self.classify(&request);
        let path = lookup_path(request.uri().path()).into_owned();

        let Some(target) = self.resolve(&path) else {
            tracing::error!(path = %path, "No forwarding target for request");
            return self.fail(ForwardError::NoForwardingTarget, mode, false, started);
        };
        let matched = !target.is_default();

        tracing::debug!(
            path = %path,
            backend = %target,
            mode = mode.as_str(),
            "Forwarding request"
        );

        let abandoned = Abandoned {
            forwarder: self,
            path: &path,
            mode,
            matched,
            started,
            armed: true,
        };
        let guard = self.sessions.track(request.uri());
        let session = ForwardingSession {
            target,
            request,
            client,
            cancel,
            guard,
        };

        let result = match mode {
            ForwardMode::Buffered => self.buffered.forward(session).await,
            ForwardMode::Streaming => self.streaming.forward(session).await,
            ForwardMode::WebSocket => self.websocket.forward(session).await,
        };

        abandoned.disarm();

        match result {
            Ok(response) => {
                metrics::record_request(mode.as_str(), response.status().as_u16(), matched, started);
                response
            }
            Err(err) => {
                if err.is_cancellation() {
                    tracing::warn!(path = %path, kind = err.kind(), error = %err, "Request cancelled");
                } else {
                    tracing::error!(path = %path, kind = err.kind(), error = %err, "Error forwarding request");
                }
                self.fail(err, mode, matched, started)
            }
        }
    }

    fn fail(&self, err: ForwardError, mode: ForwardMode, matched: bool, started: Instant) -> Response<Body> {
        metrics::record_forward_error(err.kind());
        let response = self.error_handler.handle(&err);
        metrics::record_request(mode.as_str(), response.status().as_u16(), matched, started);
        response
    }
}

/// Classifies a session dropped before it produced a response.
///
/// The server drops the handler future when the client disconnects, so this is
/// where a vanished client becomes a `ClientGone` cancellation.
struct Abandoned<'a> {
    forwarder: &'a Forwarder,
    path: &'a str,
    mode: ForwardMode,
    matched: bool,
    started: Instant,
    armed: bool,
}

impl Abandoned<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Abandoned<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let err = ForwardError::Cancelled {
            cause: CancelCause::ClientGone,
        };
        tracing::warn!(path = %self.path, kind = err.kind(), error = %err, "Request cancelled");
        // Nobody is left to receive the response.
        let _ = self.forwarder.fail(err, self.mode, self.matched, self.started);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{RouteEntry, RouteStore};
    use axum::http::StatusCode;

    fn config(default: Option<&str>) -> ForwarderConfig {
        ForwarderConfig {
            default_upstream: default.map(|u| Url::parse(u).unwrap()),
            ..ForwarderConfig::default()
        }
    }

    fn table() -> Arc<RouteTable> {
        Arc::new(RouteTable::new(RouteStore::from_entries([
            RouteEntry::new("/a", "127.0.0.1:20001"),
            RouteEntry::new("/a/b", "127.0.0.1:20002"),
        ])))
    }

    #[test]
    fn resolves_longest_prefix_then_default() {
        let forwarder = Forwarder::builder(table(), config(Some("http://localhost:9000")))
            .build()
            .unwrap();

        let target = forwarder.resolve("/a/b/c").unwrap();
        assert_eq!(target.authority.as_str(), "127.0.0.1:20002");
        assert_eq!(target.prefix.as_deref(), Some("/a/b"));

        assert_eq!(forwarder.resolve("/a/x").unwrap().authority.as_str(), "127.0.0.1:20001");

        let fallback = forwarder.resolve("/z").unwrap();
        assert!(fallback.is_default());
        assert_eq!(fallback.authority.as_str(), "localhost:9000");
    }

    #[test]
    fn lookup_decodes_escapes() {
        assert_eq!(lookup_path("/a%20b/x"), "/a b/x");
        assert_eq!(lookup_path("/plain"), "/plain");
        assert_eq!(lookup_path("/bad%ZZ"), "/bad%ZZ");
    }

    #[test]
    fn default_port_comes_from_scheme() {
        let forwarder = Forwarder::builder(table(), config(Some("http://localhost"))).build().unwrap();
        assert_eq!(forwarder.resolve("/z").unwrap().authority.as_str(), "localhost:80");
    }

    #[test]
    fn resolution_follows_published_snapshot() {
        let routes = table();
        let forwarder = Forwarder::builder(routes.clone(), config(None)).build().unwrap();
        let before = forwarder.resolve("/a/b").unwrap();

        routes.publish(RouteStore::from_entries([RouteEntry::new("/a", "127.0.0.1:30001")]));

        assert_eq!(before.authority.as_str(), "127.0.0.1:20002");
        assert_eq!(forwarder.resolve("/a/b").unwrap().authority.as_str(), "127.0.0.1:30001");
    }

    #[test]
    fn build_rejects_bad_settings() {
        let https = Forwarder::builder(table(), config(Some("https://example.com"))).build();
        assert!(matches!(https, Err(BuildError::InvalidUpstream(_))));

        let zero = ForwarderConfig {
            flush_interval: Duration::ZERO,
            ..ForwarderConfig::default()
        };
        assert!(matches!(Forwarder::builder(table(), zero).build(), Err(BuildError::ZeroFlushInterval)));
    }

    #[test]
    fn classifies_requests() {
        let forwarder = Forwarder::builder(table(), config(None)).build().unwrap();
        let plain = Request::builder().uri("/a").body(()).unwrap();
        assert_eq!(forwarder.classify(&plain), ForwardMode::Buffered);

        let upgrade = Request::builder()
            .uri("/a")
            .header("connection", "Upgrade")
            .header("upgrade", "websocket")
            .body(())
            .unwrap();
        assert_eq!(forwarder.classify(&upgrade), ForwardMode::WebSocket);

        let streaming = Forwarder::builder(
            table(),
            ForwarderConfig {
                stream: true,
                ..ForwarderConfig::default()
            },
        )
        .build()
        .unwrap();
        assert_eq!(streaming.classify(&plain), ForwardMode::Streaming);
        assert_eq!(streaming.classify(&upgrade), ForwardMode::WebSocket);
    }

    #[tokio::test]
    async fn no_target_answers_bad_gateway() {
        let forwarder = Forwarder::builder(Arc::new(RouteTable::default()), config(None))
            .build()
            .unwrap();
        let request = Request::builder().uri("/nowhere").body(Body::empty()).unwrap();
        let response = forwarder
            .serve(request, ClientInfo::plain("127.0.0.1:1000".parse().unwrap()), CancelSignal::never())
            .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(forwarder.sessions().active_count(), 0);
    }
}
