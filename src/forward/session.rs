//! Per-request forwarding sessions.
//!
//! # Responsibilities
//! - Carry the resolved target, inbound request and client facts to a forwarder
//! - Expose a cancellation signal derived from the inbound request's lifetime
//! - Track active sessions and notify an optional state listener
//!
//! A session is owned by exactly one task and never shared.

use std::fmt;
use std::future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::uri::Authority;
use axum::http::{Request, Uri};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::forward::error::CancelCause;
use crate::observability::metrics;

static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> Self {
        Self(SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Where a session sends its traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub authority: Authority,
    /// The route prefix that selected this target; `None` for the default upstream.
    pub prefix: Option<String>,
}

impl Target {
    pub fn new(authority: Authority, prefix: Option<String>) -> Self {
        Self { authority, prefix }
    }

    pub fn is_default(&self) -> bool {
        self.prefix.is_none()
    }

    /// `host:port` suitable for a TCP connect, defaulting the port to 80.
    pub fn socket_address(&self) -> String {
        format!(
            "{}:{}",
            self.authority.host(),
            self.authority.port_u16().unwrap_or(80)
        )
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http://{}", self.authority)
    }
}

/// What the proxy itself observed about the inbound connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientInfo {
    pub peer: SocketAddr,
    pub tls: bool,
}

impl ClientInfo {
    pub fn plain(peer: SocketAddr) -> Self {
        Self { peer, tls: false }
    }

    pub fn scheme(&self) -> &'static str {
        if self.tls {
            "https"
        } else {
            "http"
        }
    }
}

/// Resolves once the inbound request should no longer be waited on.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    deadline: Option<Instant>,
    trigger: Option<watch::Receiver<bool>>,
}

/// Fires the paired [`CancelSignal`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self::default()
    }

    /// A signal fired through the returned handle.
    pub fn pair() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (
            CancelHandle { tx },
            CancelSignal {
                deadline: None,
                trigger: Some(rx),
            },
        )
    }

    /// Also fire once `timeout` has elapsed from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Wait for cancellation. Dropping a handle without firing it never cancels.
    pub async fn cancelled(&self) -> CancelCause {
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => future::pending::<()>().await,
            }
        };
        let trigger = async {
            let Some(rx) = &self.trigger else {
                return future::pending::<()>().await;
            };
            let mut rx = rx.clone();
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                if rx.changed().await.is_err() {
                    return future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            _ = deadline => CancelCause::Deadline,
            _ = trigger => CancelCause::ClientGone,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Disconnected,
}

/// Observer notified when sessions start and end.
pub trait StateListener: Send + Sync {
    fn on_state(&self, uri: &Uri, state: SessionState);
}

impl<F> StateListener for F
where
    F: Fn(&Uri, SessionState) + Send + Sync,
{
    fn on_state(&self, uri: &Uri, state: SessionState) {
        self(uri, state)
    }
}

/// Counts live sessions.
#[derive(Clone, Default)]
pub struct SessionTracker {
    active: Arc<AtomicU64>,
    listener: Option<Arc<dyn StateListener>>,
}

impl fmt::Debug for SessionTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTracker")
            .field("active", &self.active_count())
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

impl SessionTracker {
    pub fn new(listener: Option<Arc<dyn StateListener>>) -> Self {
        Self {
            active: Arc::new(AtomicU64::new(0)),
            listener,
        }
    }

    /// Record a new session. The returned guard ends it on drop.
    pub fn track(&self, uri: &Uri) -> SessionGuard {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_active_sessions(active);
        if let Some(listener) = &self.listener {
            listener.on_state(uri, SessionState::Connected);
        }
        SessionGuard {
            id: SessionId::next(),
            uri: uri.clone(),
            active: Arc::clone(&self.active),
            listener: self.listener.clone(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }
}

/// Keeps a session counted until dropped.
pub struct SessionGuard {
    id: SessionId,
    uri: Uri,
    active: Arc<AtomicU64>,
    listener: Option<Arc<dyn StateListener>>,
}

impl SessionGuard {
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGuard").field("id", &self.id).field("uri", &self.uri).finish()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let active = self.active.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::set_active_sessions(active);
        if let Some(listener) = &self.listener {
            listener.on_state(&self.uri, SessionState::Disconnected);
        }
        tracing::trace!(session_id = %self.id, "Session closed");
    }
}

/// Everything a forwarder needs for one request.
#[derive(Debug)]
pub struct ForwardingSession {
    pub target: Target,
    /// The inbound request, untouched. Forwarders build their own outbound copy.
    pub request: Request<Body>,
    pub client: ClientInfo,
    pub cancel: CancelSignal,
    pub guard: SessionGuard,
}
