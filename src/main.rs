//! Path-prefix routing reverse proxy.
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────┐
//!   Client ──────▶│ proxy listener ─▶ Forwarder ─▶ buffered / streaming  │──▶ backend
//!                 │                      │          / websocket          │    (control plane
//!                 │                      ▼                               │     listen address)
//!                 │                 RouteTable ◀── RouteReloader ◀──────┼──── control plane
//!                 │                      ▲                               │     (poll)
//!   Operator ────▶│ admin listener ──────┘ ─────── create / delete ─────┼───▶
//!                 └──────────────────────────────────────────────────────┘
//! ```

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use prefix_proxy::admin::{run_admin_server, setup_admin_router, AdminState};
use prefix_proxy::config::{read_config, validate_config, Cli, ConfigError, ProxyConfig};
use prefix_proxy::control::ToxiproxyClient;
use prefix_proxy::forward::{Forwarder, ForwarderConfig};
use prefix_proxy::http::ProxyServer;
use prefix_proxy::lifecycle::{wait_for_signal, Shutdown};
use prefix_proxy::observability::{logging, metrics};
use prefix_proxy::routing::{NameCodec, RouteReloader, RouteTable};

const FALLBACK_BACKEND_UPSTREAM: &str = "localhost:80";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => read_config(path)?,
        None => ProxyConfig::default(),
    };
    cli.apply(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init_logging(&config.observability);
    tracing::info!("prefix-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        admin_address = %config.admin.bind_address,
        control_plane = %config.control_plane.api_url,
        default_upstream = %config.upstream.default_url,
        stream = config.forwarding.stream,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let control = ToxiproxyClient::new(
        config.control_plane.api_url.clone(),
        Duration::from_secs(config.control_plane.request_timeout_secs),
    )?;
    tracing::debug!(api_url = %control.base_url(), "Control plane client ready");
    let routes = Arc::new(RouteTable::default());
    let codec = NameCodec::new(config.control_plane.name_separator.clone());

    let forwarder_config = ForwarderConfig::from_proxy_config(&config)?;
    let backend_upstream = forwarder_config
        .default_upstream
        .as_ref()
        .and_then(|url| {
            let host = url.host_str()?;
            Some(format!("{}:{}", host, url.port_or_known_default()?))
        })
        .unwrap_or_else(|| FALLBACK_BACKEND_UPSTREAM.to_string());
    let forwarder = Arc::new(Forwarder::builder(routes.clone(), forwarder_config).build()?);

    let shutdown = Shutdown::new();

    let reloader = RouteReloader::new(
        control.clone(),
        routes.clone(),
        codec.clone(),
        Duration::from_millis(config.control_plane.poll_interval_ms),
    );
    let reload_task = tokio::spawn(reloader.run(shutdown.subscribe()));

    let admin_task = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let router = setup_admin_router(AdminState {
            control,
            routes: routes.clone(),
            codec,
            listen_host: config.control_plane.listen_host.clone(),
            upstream: backend_upstream,
            sessions: forwarder.sessions().clone(),
        });
        Some(tokio::spawn(run_admin_server(router, listener, shutdown.subscribe())))
    } else {
        None
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");
    let server = ProxyServer::new(forwarder, Duration::from_secs(config.timeouts.request_secs));
    let server_shutdown = shutdown.subscribe();

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        signal_shutdown.trigger();
    });

    let served = server.run(listener, server_shutdown).await;
    shutdown.trigger();

    if let Some(admin_task) = admin_task {
        match admin_task.await {
            Ok(Err(e)) => tracing::error!(error = %e, "Admin API failed"),
            Err(e) => tracing::error!(error = %e, "Admin API task panicked"),
            Ok(Ok(())) => {}
        }
    }
    if let Err(e) = reload_task.await {
        tracing::error!(error = %e, "Route reloader task panicked");
    }

    served?;
    tracing::info!("Shutdown complete");
    Ok(())
}
