//! Per-connection state visible to message middleware

use std::collections::HashMap;

use axum::body::Bytes;
use serde_json::Value;

use super::handler::SocketHandle;
use super::messages::{Inbound, MessageEnvelope};
use crate::ids::ConnectionKey;

/// Well-known attribute and local names
pub mod keys {
    /// Attribute holding the connection's key
    pub const CONNECTION_KEY: &str = "connection_key";

    /// Raw inbound payload (`Local::Bytes`)
    pub const MESSAGE_RAW: &str = "message_raw";
    /// Inbound payload as text (`Local::Text`)
    pub const MESSAGE_DATA: &str = "message_data";
    /// Envelope `from` (`Local::Text`)
    pub const MESSAGE_FROM: &str = "message_from";
    /// Envelope `event` (`Local::Text`)
    pub const MESSAGE_EVENT: &str = "message_event";
    /// Envelope `to` (`Local::Text`)
    pub const MESSAGE_TO: &str = "message_to";
    /// Parsed envelope (`Local::Envelope`)
    pub const MESSAGE_ENVELOPE: &str = "message_envelope";
    /// Reply set by a middleware
    pub const RESPONSE: &str = "response";

    /// Every local that belongs to a single message
    pub const MESSAGE_LOCALS: [&str; 7] = [
        MESSAGE_RAW,
        MESSAGE_DATA,
        MESSAGE_FROM,
        MESSAGE_EVENT,
        MESSAGE_TO,
        MESSAGE_ENVELOPE,
        RESPONSE,
    ];
}

/// Value stored in a connection local
#[derive(Debug, Clone, PartialEq)]
pub enum Local {
    /// UTF-8 text, sent as a text frame when used as a response
    Text(String),
    /// Raw bytes, sent as a binary frame when used as a response
    Bytes(Bytes),
    /// Arbitrary JSON, serialized when used as a response
    Json(Value),
    /// A parsed envelope
    Envelope(MessageEnvelope),
}

impl Local {
    /// Text content, if this is a text local
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<String> for Local {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Local {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Bytes> for Local {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Local {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes.into())
    }
}

impl From<Value> for Local {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<MessageEnvelope> for Local {
    fn from(envelope: MessageEnvelope) -> Self {
        Self::Envelope(envelope)
    }
}

/// State of one WebSocket connection, passed to every middleware
///
/// Attributes live for the whole connection. Locals are scratch space:
/// the `message_*` locals and the response are set for one inbound
/// message and cleared before the next one is read.
#[derive(Debug)]
pub struct ConnectionContext {
    handle: SocketHandle,
    user_id: Option<String>,
    attributes: HashMap<String, String>,
    locals: HashMap<String, Local>,
}

impl ConnectionContext {
    /// Context for an anonymous connection
    #[must_use]
    pub fn new(handle: SocketHandle) -> Self {
        Self {
            handle,
            user_id: None,
            attributes: HashMap::new(),
            locals: HashMap::new(),
        }
    }

    /// Attach the identity the connection was opened with
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Key of the underlying connection
    #[must_use]
    pub fn key(&self) -> &ConnectionKey {
        self.handle.key()
    }

    /// Identity the connection was opened with
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Handle for pushing frames to this connection
    #[must_use]
    pub fn handle(&self) -> &SocketHandle {
        &self.handle
    }

    /// Set a connection attribute
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Read a connection attribute
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Remove a connection attribute
    pub fn remove_attribute(&mut self, key: &str) -> Option<String> {
        self.attributes.remove(key)
    }

    /// Set a local
    pub fn set_local(&mut self, key: impl Into<String>, value: impl Into<Local>) {
        self.locals.insert(key.into(), value.into());
    }

    /// Read a local
    #[must_use]
    pub fn local(&self, key: &str) -> Option<&Local> {
        self.locals.get(key)
    }

    /// Remove and return a local
    pub fn take_local(&mut self, key: &str) -> Option<Local> {
        self.locals.remove(key)
    }

    /// Envelope of the message being handled
    #[must_use]
    pub fn envelope(&self) -> Option<&MessageEnvelope> {
        match self.locals.get(keys::MESSAGE_ENVELOPE) {
            Some(Local::Envelope(envelope)) => Some(envelope),
            _ => None,
        }
    }

    /// Event of the message being handled
    #[must_use]
    pub fn event(&self) -> Option<&str> {
        self.local(keys::MESSAGE_EVENT).and_then(Local::as_text)
    }

    /// Set the reply for the message being handled
    ///
    /// A later middleware may overwrite it. It is only sent if the whole
    /// chain succeeds.
    pub fn set_response(&mut self, response: impl Into<Local>) {
        self.set_local(keys::RESPONSE, response);
    }

    /// Reply set so far, if any
    #[must_use]
    pub fn response(&self) -> Option<&Local> {
        self.local(keys::RESPONSE)
    }

    /// Remove and return the reply
    pub fn take_response(&mut self) -> Option<Local> {
        self.take_local(keys::RESPONSE)
    }

    pub(crate) fn inject_message(&mut self, inbound: &Inbound, envelope: &MessageEnvelope) {
        self.set_local(keys::MESSAGE_RAW, inbound.to_bytes());
        self.set_local(
            keys::MESSAGE_DATA,
            String::from_utf8_lossy(inbound.as_bytes()).into_owned(),
        );
        self.set_local(keys::MESSAGE_FROM, envelope.from.as_str());
        self.set_local(keys::MESSAGE_EVENT, envelope.event.as_str());
        self.set_local(keys::MESSAGE_TO, envelope.to.as_str());
        self.set_local(keys::MESSAGE_ENVELOPE, envelope.clone());
    }

    pub(crate) fn clear_message_locals(&mut self) {
        for key in keys::MESSAGE_LOCALS {
            self.locals.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inject_and_clear_message_locals() {
        let (handle, _rx) = SocketHandle::channel(4);
        let mut ctx = ConnectionContext::new(handle);
        ctx.set_local("session", "kept");

        let inbound = Inbound::from(r#"{"event":"join_room","data":"lobby"}"#);
        let envelope = MessageEnvelope::parse(inbound.as_bytes());
        ctx.inject_message(&inbound, &envelope);
        ctx.set_response("ok");

        assert_eq!(ctx.event(), Some("join_room"));
        assert_eq!(ctx.envelope().map(|e| e.data.as_str()), Some("lobby"));
        assert_eq!(
            ctx.local(keys::MESSAGE_DATA).and_then(Local::as_text),
            Some(r#"{"event":"join_room","data":"lobby"}"#)
        );

        ctx.clear_message_locals();

        for key in keys::MESSAGE_LOCALS {
            assert!(ctx.local(key).is_none(), "{key} survived");
        }
        assert_eq!(ctx.local("session").and_then(Local::as_text), Some("kept"));
    }

    #[tokio::test]
    async fn test_attributes() {
        let (handle, _rx) = SocketHandle::channel(4);
        let mut ctx = ConnectionContext::new(handle).with_user("alice");

        assert_eq!(ctx.user_id(), Some("alice"));
        ctx.set_attribute("locale", "en");
        assert_eq!(ctx.attribute("locale"), Some("en"));
        assert_eq!(ctx.remove_attribute("locale").as_deref(), Some("en"));
        assert!(ctx.attribute("locale").is_none());
    }
}
