//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, catch-all route)
//!     → request.rs (request ID, /ping heartbeat)
//!     → forward::Forwarder (resolve, dispatch, relay)
//!     → response.rs (ErrorHandler on failure)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{UuidRequestId, X_REQUEST_ID};
pub use response::{ErrorBody, ErrorHandler, JsonErrorHandler};
pub use server::{with_common_layers, ProxyServer, ProxyState};
