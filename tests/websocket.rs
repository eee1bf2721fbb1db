//! WebSocket relay through the proxy.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use prefix_proxy::forward::ForwarderConfig;
use prefix_proxy::lifecycle::Shutdown;
use prefix_proxy::routing::{RouteEntry, RouteStore, RouteTable};
use tokio_tungstenite::tungstenite::{client::IntoClientRequest, Error as WsError, Message};

mod common;

#[tokio::test]
async fn relays_messages_both_ways() {
    let backend = common::start_ws_echo_backend().await;
    let routes = Arc::new(RouteTable::new(RouteStore::from_entries([RouteEntry::new(
        "/ws",
        backend.to_string(),
    )])));
    let shutdown = Shutdown::new();
    let forwarder = common::build_forwarder(routes, ForwarderConfig::default());
    let sessions = forwarder.sessions().clone();
    let proxy = common::start_proxy(forwarder, &shutdown).await;

    let (mut socket, response) = tokio_tungstenite::connect_async(format!("ws://{proxy}/ws/echo"))
        .await
        .unwrap();
    assert_eq!(response.status(), 101);

    socket.send(Message::text("hello")).await.unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(2), socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(reply, Message::text("hello"));

    socket.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(2), socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(reply, Message::binary(vec![1u8, 2, 3]));
    assert_eq!(sessions.active_count(), 1);

    socket.close(None).await.unwrap();
    drop(socket);

    let mut released = false;
    for _ in 0..50 {
        if sessions.active_count() == 0 {
            released = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(released, "websocket session still counted after close");

    shutdown.trigger();
}

#[tokio::test]
async fn negotiated_subprotocol_comes_back() {
    let backend = common::start_backend(axum::Router::new().route(
        "/{*path}",
        axum::routing::get(|ws: axum::extract::ws::WebSocketUpgrade| async move {
            ws.protocols(["chat"]).on_upgrade(|_socket| async {})
        }),
    ))
    .await;
    let shutdown = Shutdown::new();
    let proxy = common::start_proxy(
        common::build_forwarder(Arc::new(RouteTable::default()), common::default_upstream(backend)),
        &shutdown,
    )
    .await;

    let mut request = format!("ws://{proxy}/chat").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("sec-websocket-protocol", "chat".parse().unwrap());
    let (_socket, response) = tokio_tungstenite::connect_async(request).await.unwrap();
    assert_eq!(response.headers().get("sec-websocket-protocol").unwrap(), "chat");

    shutdown.trigger();
}

#[tokio::test]
async fn dial_failure_is_reported_before_upgrade() {
    let dead = common::closed_port().await;
    let shutdown = Shutdown::new();
    let proxy = common::start_proxy(
        common::build_forwarder(Arc::new(RouteTable::default()), common::default_upstream(dead)),
        &shutdown,
    )
    .await;

    match tokio_tungstenite::connect_async(format!("ws://{proxy}/ws")).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 502),
        Err(e) => panic!("expected an HTTP error, got {e}"),
        Ok(_) => panic!("handshake with a dead backend succeeded"),
    }

    shutdown.trigger();
}
