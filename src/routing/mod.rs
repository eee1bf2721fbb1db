//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Control plane backend set (name → listen address)
//!     → reload.rs (poll, membership fingerprint)
//!     → codec.rs (name → path prefix)
//!     → store.rs (build prefix trie)
//!     → table.rs (atomic publish)
//!
//! Incoming request path
//!     → table.rs (load current snapshot)
//!     → store.rs (longest prefix match)
//!     → Return: backend address or NoMatch (caller falls back to default upstream)
//! ```
//!
//! # Design Decisions
//! - Snapshots are immutable once published; updates clone and republish
//! - No locks on the read path (arc-swap)
//! - One prefix maps to exactly one backend address

pub mod codec;
pub mod reload;
pub mod store;
pub mod table;

pub use codec::{derived_port, NameCodec};
pub use reload::{ReloadOutcome, RouteReloader};
pub use store::{RouteEntry, RouteStore};
pub use table::RouteTable;
