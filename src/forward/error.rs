//! Forwarding error taxonomy.

use std::fmt;
use std::time::Duration;

use axum::http::StatusCode;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Why a session stopped waiting for its backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// The inbound side signalled it is gone.
    ClientGone,
    /// The inbound request deadline passed.
    Deadline,
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelCause::ClientGone => write!(f, "client went away"),
            CancelCause::Deadline => write!(f, "deadline exceeded"),
        }
    }
}

/// Terminal failure of one forwarding session.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("could not find where to proxy the request")]
    NoForwardingTarget,

    #[error("failed to connect to {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: BoxError,
    },

    #[error("transport error talking to {target}: {source}")]
    Transport {
        target: String,
        #[source]
        source: BoxError,
    },

    #[error("{target} sent no response headers within {limit:?}")]
    Timeout { target: String, limit: Duration },

    #[error("request cancelled: {cause}")]
    Cancelled { cause: CancelCause },

    #[error("failed to copy the backend response: {0}")]
    ResponseCopy(#[source] BoxError),

    #[error("websocket upgrade failed: {0}")]
    Upgrade(String),

    #[error("cannot build the outbound request: {0}")]
    BadRequest(String),
}

impl ForwardError {
    /// Default client-visible status.
    pub fn status(&self) -> StatusCode {
        match self {
            ForwardError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ForwardError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ForwardError::NoForwardingTarget
            | ForwardError::Dial { .. }
            | ForwardError::Transport { .. }
            | ForwardError::Cancelled { .. }
            | ForwardError::ResponseCopy(_)
            | ForwardError::Upgrade(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ForwardError::NoForwardingTarget => "no_forwarding_target",
            ForwardError::Dial { .. } => "dial_failure",
            ForwardError::Transport { .. } => "transport_error",
            ForwardError::Timeout { .. } => "timeout",
            ForwardError::Cancelled { .. } => "request_cancelled",
            ForwardError::ResponseCopy(_) => "response_copy_error",
            ForwardError::Upgrade(_) => "upgrade_failure",
            ForwardError::BadRequest(_) => "bad_request",
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, ForwardError::Cancelled { .. })
    }

    pub(crate) fn dial(target: impl fmt::Display, source: impl Into<BoxError>) -> Self {
        ForwardError::Dial {
            target: target.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn transport(target: impl fmt::Display, source: impl Into<BoxError>) -> Self {
        ForwardError::Transport {
            target: target.to_string(),
            source: source.into(),
        }
    }
}
