//! Realtime device tree store.
//!
//! A path-addressed JSON tree with one-shot reads, subtree writes (null means
//! delete) and change subscriptions. This is the hub-side implementation of the
//! read_once/write/subscribe/unsubscribe contract every dashboard component and
//! the auth services are written against.

mod tree;

pub use tree::{StoreError, SubscriptionId, TreeStore};

use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

/// Cheaply clonable handle shared by the server, services and tests.
#[derive(Clone)]
pub struct SharedStore(pub Arc<TreeStore>);

impl SharedStore {
    /// Open a store persisted under `dir` (snapshot loaded if present).
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        Ok(Self(Arc::new(TreeStore::open(dir)?)))
    }

    /// Purely in-memory store, used by tests and embedded callers.
    pub fn in_memory() -> Self {
        Self(Arc::new(TreeStore::in_memory()))
    }
}

impl Deref for SharedStore {
    type Target = TreeStore;
    fn deref(&self) -> &TreeStore { &self.0 }
}
