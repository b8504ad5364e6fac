//! Wire formats for inbound and outbound WebSocket messages

use axum::body::Bytes;
use axum::extract::ws::{Message, Utf8Bytes};
use serde::{Deserialize, Serialize};

use super::events;

/// Sender name stamped on server-originated envelopes
pub const SERVER_SENDER: &str = "server";

/// `{data, from, event, to}` message envelope
///
/// Missing fields decode as empty strings and unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Message body
    #[serde(default)]
    pub data: String,
    /// Sender, as claimed by the client or [`SERVER_SENDER`]
    #[serde(default)]
    pub from: String,
    /// Event name used for routing
    #[serde(default)]
    pub event: String,
    /// Recipient user or room
    #[serde(default)]
    pub to: String,
}

impl MessageEnvelope {
    /// Best-effort decode of an inbound payload
    ///
    /// Only a JSON object is decoded. Anything else, arrays included,
    /// becomes a plain `message` event carrying the whole payload as `data`.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        match serde_json::from_slice::<serde_json::Value>(raw) {
            Ok(value @ serde_json::Value::Object(_)) => serde_json::from_value(value).ok(),
            _ => None,
        }
        .unwrap_or_else(|| Self {
            data: String::from_utf8_lossy(raw).into_owned(),
            event: events::MESSAGE.to_string(),
            ..Self::default()
        })
    }

    /// Envelope for a message pushed by the server to `to`
    #[must_use]
    pub fn server(event: impl Into<String>, data: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            from: SERVER_SENDER.to_string(),
            event: event.into(),
            to: to.into(),
        }
    }
}

/// Reply sent when a middleware rejects a message
#[derive(Debug, Serialize)]
pub struct MiddlewareErrorReply<'a> {
    /// Always `middleware_error`
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Error text from the middleware
    pub error: &'a str,
    /// Envelope of the rejected message
    pub message: &'a MessageEnvelope,
}

impl<'a> MiddlewareErrorReply<'a> {
    /// Build the reply for `error` on `message`
    #[must_use]
    pub fn new(error: &'a str, message: &'a MessageEnvelope) -> Self {
        Self {
            kind: events::MIDDLEWARE_ERROR,
            error,
            message,
        }
    }
}

/// A data frame received from a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Text frame
    Text(Utf8Bytes),
    /// Binary frame
    Binary(Bytes),
}

impl Inbound {
    /// Raw payload bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_str().as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Raw payload as an owned `Bytes`
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Self::Text(text) => Bytes::copy_from_slice(text.as_str().as_bytes()),
            Self::Binary(bytes) => bytes.clone(),
        }
    }

    /// Frame carrying the same payload and frame type, used for echo
    #[must_use]
    pub fn to_message(&self) -> Message {
        match self {
            Self::Text(text) => Message::Text(text.clone()),
            Self::Binary(bytes) => Message::Binary(bytes.clone()),
        }
    }

    /// Extract a data frame, ignoring control frames
    #[must_use]
    pub fn from_message(message: Message) -> Option<Self> {
        match message {
            Message::Text(text) => Some(Self::Text(text)),
            Message::Binary(bytes) => Some(Self::Binary(bytes)),
            _ => None,
        }
    }
}

impl From<&str> for Inbound {
    fn from(text: &str) -> Self {
        Self::Text(text.into())
    }
}

impl From<String> for Inbound {
    fn from(text: String) -> Self {
        Self::Text(text.into())
    }
}

impl From<Vec<u8>> for Inbound {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes.into())
    }
}
