//! Process-wide table of connected clients
//!
//! [`ClientRegistry`] maps a caller-supplied user id to a [`ClientInfo`]
//! record. There is one record per user, not per socket: a second
//! [`ClientRegistry::add_client`] for the same user replaces the first
//! (last writer wins).
//!
//! Every operation is safe to call from any task and none of them fail.
//! Absence is reported as `None` or `false`. The table is guarded by a
//! synchronous `RwLock` that is never held across an `.await`, and a
//! poisoned lock is recovered rather than propagated.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexSet;
use serde_json::Value;

use super::handler::SocketHandle;
use super::rooms::RoomId;

/// Typed per-client metadata
#[derive(Debug, Clone, Default)]
pub struct ClientMetadata {
    /// Rooms the client has joined, in join order
    pub rooms: IndexSet<RoomId>,
    /// Free-form attributes set by middleware or scripts
    pub extra: HashMap<String, Value>,
}

/// Registry record for one connected user
#[derive(Debug, Clone)]
pub struct ClientInfo {
    /// Identifier of the underlying connection
    pub uuid: String,
    /// Caller-supplied identity, unique within the registry
    pub user_id: String,
    /// When the record was created
    pub connected_at: DateTime<Utc>,
    /// Last activity, refreshed by touches and successful sends
    pub last_seen: DateTime<Utc>,
    /// Rooms and free-form attributes
    pub metadata: ClientMetadata,
    /// Live connection, if one is attached
    pub socket: Option<SocketHandle>,
}

impl ClientInfo {
    fn new(user_id: String, uuid: String) -> Self {
        let now = Utc::now();
        Self {
            uuid,
            user_id,
            connected_at: now,
            last_seen: now,
            metadata: ClientMetadata::default(),
            socket: None,
        }
    }

    /// Whether a live socket is attached
    #[must_use]
    pub fn has_socket(&self) -> bool {
        self.socket.is_some()
    }
}

/// Thread-safe registry of connected clients
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, ClientInfo>>,
    pub(super) reaper_running: AtomicBool,
}

impl ClientRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ClientInfo>> {
        self.clients.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ClientInfo>> {
        self.clients.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against one record under the write lock
    pub(crate) fn update<R>(&self, user_id: &str, f: impl FnOnce(&mut ClientInfo) -> R) -> Option<R> {
        self.write().get_mut(user_id).map(f)
    }

    /// Run `f` against one record under the read lock
    pub(crate) fn inspect<R>(&self, user_id: &str, f: impl FnOnce(&ClientInfo) -> R) -> Option<R> {
        self.read().get(user_id).map(f)
    }

    /// Insert or replace the record for `user_id`
    ///
    /// The new record starts with fresh timestamps, empty metadata and no
    /// socket.
    pub fn add_client(&self, user_id: impl Into<String>, uuid: impl Into<String>) {
        let user_id = user_id.into();
        let uuid = uuid.into();
        tracing::debug!(user_id = %user_id, uuid = %uuid, "Client registered");

        let replaced = self
            .write()
            .insert(user_id.clone(), ClientInfo::new(user_id.clone(), uuid));
        if let Some(previous) = replaced {
            tracing::debug!(user_id = %user_id, previous_uuid = %previous.uuid, "Replaced existing client record");
        }
    }

    /// Remove the record for `user_id`
    ///
    /// Returns `true` if a record was removed.
    pub fn remove_client(&self, user_id: &str) -> bool {
        let removed = self.write().remove(user_id).is_some();
        if removed {
            tracing::debug!(user_id = %user_id, "Client removed");
        }
        removed
    }

    /// Remove the record for `user_id` only if it still belongs to `uuid`
    ///
    /// A socket that closes after the same user reconnected must not take
    /// the newer connection's record with it.
    pub fn remove_connection(&self, user_id: &str, uuid: &str) -> bool {
        let mut clients = self.write();
        match clients.get(user_id) {
            Some(info) if info.uuid == uuid => {
                clients.remove(user_id);
                tracing::debug!(user_id = %user_id, uuid = %uuid, "Connection removed");
                true
            }
            Some(info) => {
                tracing::debug!(
                    user_id = %user_id,
                    uuid = %uuid,
                    current_uuid = %info.uuid,
                    "Skipped removal of superseded connection"
                );
                false
            }
            None => false,
        }
    }

    /// Attach a live socket to an existing record and refresh `last_seen`
    ///
    /// Does nothing if the user is not registered.
    pub fn set_socket(&self, user_id: &str, socket: SocketHandle) -> bool {
        self.update(user_id, |info| {
            info.socket = Some(socket);
            info.last_seen = Utc::now();
        })
        .is_some()
    }

    /// Detach the live socket from a record
    pub fn clear_socket(&self, user_id: &str) -> bool {
        self.update(user_id, |info| info.socket = None).is_some()
    }

    /// Copy of the record for `user_id`
    #[must_use]
    pub fn get_client(&self, user_id: &str) -> Option<ClientInfo> {
        self.read().get(user_id).cloned()
    }

    /// Connection uuid recorded for `user_id`
    #[must_use]
    pub fn get_client_uuid(&self, user_id: &str) -> Option<String> {
        self.inspect(user_id, |info| info.uuid.clone())
    }

    /// Owned snapshot of every record
    ///
    /// Mutating the returned map never affects the registry.
    #[must_use]
    pub fn get_clients(&self) -> HashMap<String, ClientInfo> {
        self.read().clone()
    }

    /// Map of user id to connection uuid
    #[must_use]
    pub fn get_clients_list(&self) -> HashMap<String, String> {
        self.read()
            .iter()
            .map(|(user_id, info)| (user_id.clone(), info.uuid.clone()))
            .collect()
    }

    /// Refresh `last_seen` for `user_id`
    pub fn update_last_seen(&self, user_id: &str) -> bool {
        self.update(user_id, |info| info.last_seen = Utc::now())
            .is_some()
    }

    /// Set a free-form attribute on a record
    pub fn set_client_attribute(&self, user_id: &str, key: impl Into<String>, value: Value) -> bool {
        self.update(user_id, |info| {
            info.metadata.extra.insert(key.into(), value);
        })
        .is_some()
    }

    /// Read a free-form attribute from a record
    #[must_use]
    pub fn get_client_attribute(&self, user_id: &str, key: &str) -> Option<Value> {
        self.inspect(user_id, |info| info.metadata.extra.get(key).cloned())
            .flatten()
    }

    /// Number of registered users
    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.read().len()
    }

    /// Ids of every registered user
    #[must_use]
    pub fn connected_users(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Whether `user_id` has a record
    #[must_use]
    pub fn is_user_connected(&self, user_id: &str) -> bool {
        self.read().contains_key(user_id)
    }

    /// Evict every record idle for longer than `max_idle`
    ///
    /// Returns the ids that were removed. A `max_idle` too large to subtract
    /// from the current time evicts nothing.
    pub fn cleanup_stale_connections(&self, max_idle: Duration) -> Vec<String> {
        let Some(cutoff) = TimeDelta::from_std(max_idle)
            .ok()
            .and_then(|idle| Utc::now().checked_sub_signed(idle))
        else {
            return Vec::new();
        };

        let mut removed = Vec::new();
        self.write().retain(|user_id, info| {
            let stale = info.last_seen < cutoff;
            if stale {
                removed.push(user_id.clone());
            }
            !stale
        });

        for user_id in &removed {
            tracing::debug!(user_id = %user_id, "Removed stale client");
        }
        if !removed.is_empty() {
            tracing::info!(removed = removed.len(), "Stale connection cleanup completed");
        }
        removed
    }
}
