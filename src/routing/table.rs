//! The active routing snapshot.
//!
//! Readers take an `Arc<RouteStore>` once per request and keep it until the
//! request completes. Writers never touch a published store; they publish a
//! replacement with a single atomic pointer swap.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::routing::store::{RouteEntry, RouteStore};

#[derive(Debug)]
pub struct RouteTable {
    current: ArcSwap<RouteStore>,
}

impl RouteTable {
    pub fn new(initial: RouteStore) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    /// The snapshot active right now.
    pub fn load(&self) -> Arc<RouteStore> {
        self.current.load_full()
    }

    /// Replace the active snapshot wholesale.
    pub fn publish(&self, store: RouteStore) {
        self.current.store(Arc::new(store));
    }

    /// Copy-on-write insert.
    pub fn insert(&self, entry: RouteEntry) {
        self.current.rcu(|current| {
            let mut next = RouteStore::clone(current);
            next.insert(entry.clone());
            next
        });
    }

    /// Copy-on-write delete. A missing prefix still republishes an identical copy.
    pub fn delete(&self, prefix: &str) {
        self.current.rcu(|current| {
            let mut next = RouteStore::clone(current);
            next.delete(prefix);
            next
        });
    }

    pub fn clear(&self) {
        self.publish(RouteStore::new());
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new(RouteStore::new())
    }
}
