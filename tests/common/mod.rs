//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    http::{HeaderMap, Uri},
    response::Response,
    routing::get,
    Json, Router,
};
use tokio::net::TcpListener;

use prefix_proxy::forward::{Forwarder, ForwarderConfig};
use prefix_proxy::http::ProxyServer;
use prefix_proxy::lifecycle::Shutdown;
use prefix_proxy::routing::RouteTable;

/// Serve `router` on an ephemeral port.
pub async fn start_backend(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

/// A backend answering every request with a fixed body.
pub async fn start_named_backend(name: &'static str) -> SocketAddr {
    start_backend(Router::new().fallback(move || async move { name })).await
}

/// A backend answering with the headers it received, as JSON.
pub async fn start_header_echo_backend() -> SocketAddr {
    start_backend(Router::new().fallback(echo_headers)).await
}

async fn echo_headers(headers: HeaderMap) -> Json<BTreeMap<String, Vec<String>>> {
    let mut seen: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in &headers {
        seen.entry(name.to_string())
            .or_default()
            .push(value.to_str().unwrap_or_default().to_string());
    }
    Json(seen)
}

/// A backend answering with the request target it received.
pub async fn start_uri_echo_backend() -> SocketAddr {
    start_backend(Router::new().fallback(|uri: Uri| async move { uri.to_string() })).await
}

/// A backend that sleeps before answering.
pub async fn start_slow_backend(delay: Duration) -> SocketAddr {
    start_backend(Router::new().fallback(move || async move {
        tokio::time::sleep(delay).await;
        "slow"
    }))
    .await
}

/// A WebSocket backend echoing every text and binary message.
pub async fn start_ws_echo_backend() -> SocketAddr {
    start_backend(Router::new().route("/{*path}", get(ws_echo))).await
}

async fn ws_echo(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        while let Some(Ok(message)) = socket.recv().await {
            let reply = match message {
                Message::Text(text) => Message::Text(text),
                Message::Binary(data) => Message::Binary(data),
                Message::Close(_) => break,
                _ => continue,
            };
            if socket.send(reply).await.is_err() {
                break;
            }
        }
    })
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

pub fn default_upstream(addr: SocketAddr) -> ForwarderConfig {
    ForwarderConfig {
        default_upstream: Some(url::Url::parse(&format!("http://{addr}")).unwrap()),
        server_name: "prefix-proxy-test".into(),
        ..ForwarderConfig::default()
    }
}

pub fn build_forwarder(routes: Arc<RouteTable>, config: ForwarderConfig) -> Forwarder {
    Forwarder::builder(routes, config).build().unwrap()
}

/// Serve `forwarder` on an ephemeral port until `shutdown` fires.
pub async fn start_proxy(forwarder: Forwarder, shutdown: &Shutdown) -> SocketAddr {
    start_proxy_with_timeout(forwarder, Duration::from_secs(5), shutdown).await
}

pub async fn start_proxy_with_timeout(forwarder: Forwarder, request_timeout: Duration, shutdown: &Shutdown) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = ProxyServer::new(Arc::new(forwarder), request_timeout);
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });
    addr
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
