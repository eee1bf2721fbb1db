//! Hot reload of the routing table from the control plane.
//!
//! Every tick the backend set is fetched and fingerprinted over its sorted
//! names. Only a membership change rebuilds and publishes a new snapshot; a
//! backend whose listen address changes under the same name is picked up on
//! the next membership change. Fetch failures keep the current snapshot.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::control::{Backend, ControlPlane};
use crate::observability::metrics;
use crate::routing::codec::NameCodec;
use crate::routing::store::{RouteEntry, RouteStore};
use crate::routing::table::RouteTable;

/// Membership fingerprint of a backend set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Fingerprint of a set of names. Order of the input does not matter.
    pub fn of<'a, I>(names: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut names: Vec<&str> = names.into_iter().collect();
        names.sort_unstable();
        names.dedup();

        let mut hasher = DefaultHasher::new();
        names.len().hash(&mut hasher);
        for name in names {
            name.hash(&mut hasher);
        }
        Self(hasher.finish())
    }
}

/// Build a fresh store from the control plane's backend set.
pub fn build_store(codec: &NameCodec, backends: &BTreeMap<String, Backend>) -> RouteStore {
    RouteStore::from_entries(
        backends
            .values()
            .map(|b| RouteEntry::new(codec.prefix_for(&b.name), b.listen.clone())),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Membership changed and a new snapshot with this many routes was published.
    Published(usize),
    Unchanged,
    /// The control plane could not be reached; the old snapshot stays.
    Failed,
}

pub struct RouteReloader<C> {
    control: C,
    table: Arc<RouteTable>,
    codec: NameCodec,
    interval: Duration,
    last: Option<Fingerprint>,
}

impl<C: ControlPlane> RouteReloader<C> {
    pub fn new(control: C, table: Arc<RouteTable>, codec: NameCodec, interval: Duration) -> Self {
        Self {
            control,
            table,
            codec,
            interval,
            last: None,
        }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Route reloader starting");

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Route reloader received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// One poll of the control plane.
    pub async fn tick(&mut self) -> ReloadOutcome {
        let backends = match self.control.list_backends().await {
            Ok(backends) => backends,
            Err(e) => {
                tracing::error!(error = %e, "Failed to fetch backends, keeping current routes");
                metrics::record_reload_failure();
                return ReloadOutcome::Failed;
            }
        };

        let fingerprint = Fingerprint::of(backends.keys().map(String::as_str));
        if self.last == Some(fingerprint) {
            return ReloadOutcome::Unchanged;
        }

        let store = build_store(&self.codec, &backends);
        let routes = store.len();
        self.table.publish(store);
        self.last = Some(fingerprint);

        tracing::info!(routes, "Routing table reloaded");
        metrics::record_reload(routes);
        ReloadOutcome::Published(routes)
    }
}
