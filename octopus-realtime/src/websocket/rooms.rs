//! Room membership on top of the client registry
//!
//! Membership lives in each client's [`ClientMetadata::rooms`](super::ClientMetadata)
//! set and is changed under the registry's own write lock, so a join or
//! leave can never race with another update to the same record.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::registry::{ClientInfo, ClientRegistry};
use crate::error::{RoomError, RoomJoin};

/// Unique identifier for a room
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Create a new room ID
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the room ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&RoomId> for RoomId {
    fn from(id: &RoomId) -> Self {
        id.clone()
    }
}

impl Borrow<str> for RoomId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl ClientRegistry {
    /// Add `user_id` to `room_id`
    ///
    /// Joining a room the user is already in succeeds with
    /// [`RoomJoin::AlreadyMember`] and changes nothing.
    pub fn add_room(
        &self,
        user_id: &str,
        room_id: impl Into<RoomId>,
    ) -> Result<RoomJoin, RoomError> {
        let room_id = room_id.into();
        let joined = self
            .update(user_id, |info| info.metadata.rooms.insert(room_id.clone()))
            .ok_or_else(|| RoomError::user_not_found(user_id))?;

        if joined {
            tracing::info!(user_id = %user_id, room_id = %room_id, "Member joined room");
            Ok(RoomJoin::Joined)
        } else {
            tracing::debug!(user_id = %user_id, room_id = %room_id, "Already a member of room");
            Ok(RoomJoin::AlreadyMember)
        }
    }

    /// Remove `user_id` from `room_id`
    pub fn remove_room(&self, user_id: &str, room_id: &str) -> Result<(), RoomError> {
        // shift_remove keeps the remaining rooms in join order
        let left = self
            .update(user_id, |info| info.metadata.rooms.shift_remove(room_id))
            .ok_or_else(|| RoomError::user_not_found(user_id))?;

        if !left {
            return Err(RoomError::not_in_room(user_id, room_id));
        }

        tracing::info!(user_id = %user_id, room_id = %room_id, "Member left room");
        Ok(())
    }

    /// Rooms `user_id` has joined, in join order
    pub fn get_user_rooms(&self, user_id: &str) -> Result<Vec<RoomId>, RoomError> {
        self.inspect(user_id, |info| info.metadata.rooms.iter().cloned().collect())
            .ok_or_else(|| RoomError::user_not_found(user_id))
    }

    /// Whether `user_id` is a member of `room_id`
    ///
    /// Unknown users are members of nothing.
    #[must_use]
    pub fn is_user_in_room(&self, user_id: &str, room_id: &str) -> bool {
        self.inspect(user_id, |info| info.metadata.rooms.contains(room_id))
            .unwrap_or(false)
    }

    /// Snapshot of every client in `room_id`
    #[must_use]
    pub fn get_clients_in_room(&self, room_id: &str) -> HashMap<String, ClientInfo> {
        let mut clients = self.get_clients();
        clients.retain(|_, info| info.metadata.rooms.contains(room_id));
        clients
    }
}
