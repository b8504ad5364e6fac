//! Event names used on the wire

/// Default event for payloads that are not JSON envelopes
pub const MESSAGE: &str = "message";

/// `type` of the reply sent when a middleware rejects a message
pub const MIDDLEWARE_ERROR: &str = "middleware_error";

/// Join the room named in `data`
pub const JOIN_ROOM: &str = "join_room";

/// Leave the room named in `data`
pub const LEAVE_ROOM: &str = "leave_room";

/// List the sender's rooms; also the event of the reply
pub const ROOM_LIST: &str = "room_list";

/// Send `data` to the other members of room `to`
pub const BROADCAST: &str = "broadcast";

/// Send `data` to user `to`; also the event seen by the recipient
pub const PRIVATE_MESSAGE: &str = "private_message";

/// Reply to [`JOIN_ROOM`]
pub const ROOM_JOINED: &str = "room_joined";

/// Reply to [`LEAVE_ROOM`]
pub const ROOM_LEFT: &str = "room_left";

/// Reply to [`BROADCAST`] and [`PRIVATE_MESSAGE`] with the delivery count
pub const MESSAGE_SENT: &str = "message_sent";
