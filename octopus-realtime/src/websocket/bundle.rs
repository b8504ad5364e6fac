//! Per-connection middleware bundles
//!
//! The [`BundleStore`] is the administrative view of every bound
//! connection: it maps a [`ConnectionKey`] to the connection's handle and
//! middleware chain. Evicting an entry here unbinds the connection, even
//! if its dispatcher still holds a reference.

use std::sync::Arc;

use dashmap::DashMap;

use super::handler::SocketHandle;
use super::middleware::MiddlewareChain;
use crate::ids::ConnectionKey;

/// Handle and middleware chain for one live connection
#[derive(Debug, Clone)]
pub struct ConnectionBundle {
    /// Where replies go
    pub handle: SocketHandle,
    /// Middleware run for every inbound message
    pub chain: MiddlewareChain,
}

/// Concurrent map of connection key to bundle
#[derive(Debug, Default)]
pub struct BundleStore {
    bundles: DashMap<ConnectionKey, Arc<ConnectionBundle>>,
}

impl BundleStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `bundle` under `key`, replacing any previous entry
    pub fn insert(&self, key: ConnectionKey, bundle: Arc<ConnectionBundle>) {
        tracing::debug!(connection_key = %key, layers = bundle.chain.len(), "Bundle stored");
        self.bundles.insert(key, bundle);
    }

    /// Bundle stored under `key`
    #[must_use]
    pub fn get(&self, key: &ConnectionKey) -> Option<Arc<ConnectionBundle>> {
        self.bundles.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Evict the bundle under `key`
    ///
    /// Returns `true` if an entry was removed. Evicting twice is harmless.
    pub fn remove(&self, key: &ConnectionKey) -> bool {
        let removed = self.bundles.remove(key).is_some();
        if removed {
            tracing::debug!(connection_key = %key, "Bundle evicted");
        }
        removed
    }

    /// Whether a bundle is stored under `key`
    #[must_use]
    pub fn contains(&self, key: &ConnectionKey) -> bool {
        self.bundles.contains_key(key)
    }

    /// Number of stored bundles
    #[must_use]
    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    /// Keys of every stored bundle
    #[must_use]
    pub fn keys(&self) -> Vec<ConnectionKey> {
        self.bundles.iter().map(|entry| entry.key().clone()).collect()
    }
}
