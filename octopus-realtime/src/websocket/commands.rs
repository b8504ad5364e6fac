//! Built-in room commands
//!
//! [`RoomCommands`] is a middleware that gives clients the standard event
//! vocabulary for rooms and direct messages. Events it does not know pass
//! through untouched, so it can sit anywhere in a chain.
//!
//! | event             | uses          | reply event    |
//! |-------------------|---------------|----------------|
//! | `join_room`       | `data` = room | `room_joined`  |
//! | `leave_room`      | `data` = room | `room_left`    |
//! | `room_list`       |               | `room_list`    |
//! | `broadcast`       | `to` = room   | `message_sent` |
//! | `private_message` | `to` = user   | `message_sent` |

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::broadcast::Broadcaster;
use super::context::ConnectionContext;
use super::events;
use super::middleware::MessageMiddleware;
use super::registry::ClientRegistry;
use crate::error::{MiddlewareError, RoomError};

/// Middleware handling room membership and messaging events
#[derive(Debug, Clone)]
pub struct RoomCommands {
    registry: Arc<ClientRegistry>,
    broadcaster: Broadcaster,
}

impl RoomCommands {
    /// Create the middleware
    #[must_use]
    pub fn new(registry: Arc<ClientRegistry>, broadcaster: Broadcaster) -> Self {
        Self {
            registry,
            broadcaster,
        }
    }
}

fn required<'a>(value: &'a str, what: &str) -> Result<&'a str, MiddlewareError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(MiddlewareError::new(format!("{what} is required")));
    }
    Ok(value)
}

#[async_trait]
impl MessageMiddleware for RoomCommands {
    async fn handle(&self, ctx: &mut ConnectionContext) -> Result<(), MiddlewareError> {
        let Some(envelope) = ctx.envelope().cloned() else {
            return Ok(());
        };

        let handled = matches!(
            envelope.event.as_str(),
            events::JOIN_ROOM
                | events::LEAVE_ROOM
                | events::ROOM_LIST
                | events::BROADCAST
                | events::PRIVATE_MESSAGE
        );
        if !handled {
            return Ok(());
        }

        let user_id = ctx
            .user_id()
            .ok_or_else(|| MiddlewareError::new("connection has no user"))?
            .to_string();

        let response = match envelope.event.as_str() {
            events::JOIN_ROOM => {
                let room = required(&envelope.data, "room")?;
                let joined = self.registry.add_room(&user_id, room)?;
                json!({
                    "event": events::ROOM_JOINED,
                    "room": room,
                    "already_member": !joined.is_new(),
                })
            }
            events::LEAVE_ROOM => {
                let room = required(&envelope.data, "room")?;
                self.registry.remove_room(&user_id, room)?;
                json!({ "event": events::ROOM_LEFT, "room": room })
            }
            events::ROOM_LIST => {
                let rooms = self.registry.get_user_rooms(&user_id)?;
                json!({ "event": events::ROOM_LIST, "rooms": rooms })
            }
            events::BROADCAST => {
                let room = required(&envelope.to, "room")?;
                if !self.registry.is_user_in_room(&user_id, room) {
                    return Err(RoomError::not_in_room(&user_id, room).into());
                }
                let delivered = self.broadcaster.emit_to_room(
                    room,
                    events::MESSAGE,
                    envelope.data.as_str(),
                    &[user_id.as_str()],
                );
                json!({ "event": events::MESSAGE_SENT, "room": room, "delivered": delivered })
            }
            _ => {
                let to = required(&envelope.to, "recipient")?;
                let delivered =
                    self.broadcaster
                        .emit_to_user(to, events::PRIVATE_MESSAGE, envelope.data.as_str());
                json!({ "event": events::MESSAGE_SENT, "to": to, "delivered": delivered })
            }
        };

        tracing::debug!(user_id = %user_id, event = %envelope.event, "Room command handled");
        ctx.set_response(response);
        Ok(())
    }

    fn name(&self) -> &str {
        "room_commands"
    }
}
