//! Fan-out of server messages to registered clients
//!
//! The [`Broadcaster`] walks a snapshot of the [`ClientRegistry`] and pushes
//! a `{data, from: "server", event, to}` envelope to every matching client
//! with a live socket. Delivery is fire-and-forget: a send counts once the
//! frame is queued on the client's channel. Failures for one recipient are
//! logged and skipped.
//!
//! ```rust,ignore
//! use octopus_realtime::websocket::Broadcaster;
//!
//! let broadcaster = Broadcaster::new(registry);
//! let delivered = broadcaster.emit_to_room("lobby", "message", "hello", &["alice"]);
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use axum::body::Bytes;
use serde::Serialize;
use serde_json::Value;

use super::messages::MessageEnvelope;
use super::registry::{ClientInfo, ClientRegistry};
use super::rooms::RoomId;
use crate::error::DeliveryError;

/// Payload of a broadcast
///
/// Envelopes carry `data` as a string: text goes through unchanged, bytes
/// are decoded as lossy UTF-8 and other JSON values are serialized.
#[derive(Debug, Clone, PartialEq)]
pub enum BroadcastData {
    /// Text, sent as-is
    Text(String),
    /// Bytes, sent as lossy UTF-8
    Bytes(Bytes),
    /// JSON; strings are sent as-is, anything else serialized
    Json(Value),
}

impl BroadcastData {
    /// Serialize any value as a JSON payload
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Self::Json)
    }

    fn into_wire(self) -> Result<String, serde_json::Error> {
        match self {
            Self::Text(text) | Self::Json(Value::String(text)) => Ok(text),
            Self::Bytes(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Self::Json(value) => serde_json::to_string(&value),
        }
    }
}

impl From<String> for BroadcastData {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for BroadcastData {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Bytes> for BroadcastData {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for BroadcastData {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes.into())
    }
}

impl From<Value> for BroadcastData {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// Recipients of a broadcast
#[derive(Debug, Clone)]
pub enum BroadcastTarget {
    /// Every registered client except the listed users
    All {
        /// Users to skip
        exclude: Vec<String>,
    },
    /// Members of a room except the listed users
    Room {
        /// Room to deliver to
        room: RoomId,
        /// Users to skip
        exclude: Vec<String>,
    },
    /// Exactly the listed users
    Users(Vec<String>),
}

/// Pushes server messages to clients in the registry
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<ClientRegistry>,
}

impl Broadcaster {
    /// Create a broadcaster over `registry`
    #[must_use]
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    /// Registry this broadcaster reads from
    #[must_use]
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Send `event` to every member of `room_id` not listed in `exclude`
    ///
    /// Returns the number of members the message was queued for.
    pub fn emit_to_room(
        &self,
        room_id: &str,
        event: &str,
        data: impl Into<BroadcastData>,
        exclude: &[&str],
    ) -> usize {
        let Some(data) = encode(data.into(), event) else {
            return 0;
        };
        let exclude: HashSet<&str> = exclude.iter().copied().collect();
        let clients = self.registry.get_clients();

        let sent = self.fan_out(
            clients.values().filter(|info| {
                !exclude.contains(info.user_id.as_str()) && info.metadata.rooms.contains(room_id)
            }),
            event,
            &data,
        );

        tracing::debug!(room_id = %room_id, event = %event, sent = sent, excluded = exclude.len(), "Room broadcast completed");
        sent
    }

    /// Send `event` to a single user
    ///
    /// Returns `true` if the message was queued.
    pub fn emit_to_user(&self, user_id: &str, event: &str, data: impl Into<BroadcastData>) -> bool {
        let Some(data) = encode(data.into(), event) else {
            return false;
        };
        match self.registry.get_client(user_id) {
            Some(info) => self.fan_out(std::iter::once(&info), event, &data) == 1,
            None => {
                tracing::debug!(user_id = %user_id, event = %event, "Direct message to unknown user");
                false
            }
        }
    }

    /// Send `event` to every registered user not listed in `exclude`
    pub fn emit_to_all(&self, event: &str, data: impl Into<BroadcastData>, exclude: &[&str]) -> usize {
        let Some(data) = encode(data.into(), event) else {
            return 0;
        };
        let exclude: HashSet<&str> = exclude.iter().copied().collect();
        let clients = self.registry.get_clients();

        let sent = self.fan_out(
            clients
                .values()
                .filter(|info| !exclude.contains(info.user_id.as_str())),
            event,
            &data,
        );

        tracing::debug!(event = %event, sent = sent, total = clients.len(), "Broadcast to all completed");
        sent
    }

    /// Broadcast to a [`BroadcastTarget`]
    pub fn broadcast(
        &self,
        target: BroadcastTarget,
        event: &str,
        data: impl Into<BroadcastData>,
    ) -> usize {
        match target {
            BroadcastTarget::All { exclude } => {
                let exclude: Vec<&str> = exclude.iter().map(String::as_str).collect();
                self.emit_to_all(event, data, &exclude)
            }
            BroadcastTarget::Room { room, exclude } => {
                let exclude: Vec<&str> = exclude.iter().map(String::as_str).collect();
                self.emit_to_room(room.as_str(), event, data, &exclude)
            }
            BroadcastTarget::Users(users) => {
                let Some(data) = encode(data.into(), event) else {
                    return 0;
                };
                let clients = self.registry.get_clients();
                self.fan_out(users.iter().filter_map(|user| clients.get(user)), event, &data)
            }
        }
    }

    fn fan_out<'a>(
        &self,
        recipients: impl Iterator<Item = &'a ClientInfo>,
        event: &str,
        data: &str,
    ) -> usize {
        let mut sent = 0;
        for info in recipients {
            match deliver(info, event, data) {
                Ok(()) => {
                    self.registry.update_last_seen(&info.user_id);
                    sent += 1;
                }
                Err(DeliveryError::NilHandle) => {
                    tracing::debug!(user_id = %info.user_id, event = %event, "Skipped client without socket");
                }
                Err(e) => {
                    tracing::warn!(user_id = %info.user_id, event = %event, kind = %e.kind(), error = %e, "Delivery failed");
                }
            }
        }
        sent
    }
}

fn encode(data: BroadcastData, event: &str) -> Option<String> {
    match data.into_wire() {
        Ok(data) => Some(data),
        Err(e) => {
            tracing::warn!(event = %event, error = %e, "Failed to encode broadcast payload");
            None
        }
    }
}

fn deliver(info: &ClientInfo, event: &str, data: &str) -> Result<(), DeliveryError> {
    let socket = info.socket.as_ref().ok_or(DeliveryError::NilHandle)?;
    socket.send_json(&MessageEnvelope::server(event, data, info.user_id.as_str()))
}
