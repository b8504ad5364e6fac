//! Handle to a live WebSocket connection

use axum::body::Bytes;
use axum::extract::ws::Message;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::DeliveryError;
use crate::ids::ConnectionKey;

/// Push-only handle to a live WebSocket connection
///
/// Frames are queued on a bounded channel drained by the connection's writer
/// task. Sends never wait: a full queue or a gone writer is reported as a
/// [`DeliveryError`] so one slow client cannot stall a fan-out.
#[derive(Debug, Clone)]
pub struct SocketHandle {
    key: ConnectionKey,
    sender: mpsc::Sender<Message>,
}

impl SocketHandle {
    /// Wrap an existing sender
    #[must_use]
    pub fn new(key: ConnectionKey, sender: mpsc::Sender<Message>) -> Self {
        Self { key, sender }
    }

    /// Create a handle with a freshly minted key and its receiving end
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(ConnectionKey::new(), tx), rx)
    }

    /// Key of the connection this handle writes to
    #[must_use]
    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    /// Queue a frame for the connection
    pub fn send(&self, message: Message) -> Result<(), DeliveryError> {
        self.sender.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Backpressure,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Queue a text frame
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), DeliveryError> {
        self.send(Message::Text(text.into().into()))
    }

    /// Queue a binary frame
    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), DeliveryError> {
        self.send(Message::Binary(data.into()))
    }

    /// Serialize `value` and queue it as a text frame
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), DeliveryError> {
        let text = serde_json::to_string(value)?;
        self.send_text(text)
    }

    /// Whether the writer side has gone away
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_send_text_and_json() {
        let (handle, mut rx) = SocketHandle::channel(8);

        handle.send_text("hello").unwrap();
        handle.send_json(&json!({"event": "ping"})).unwrap();

        match rx.recv().await.unwrap() {
            Message::Text(text) => assert_eq!(text.as_str(), "hello"),
            other => panic!("unexpected frame {other:?}"),
        }
        match rx.recv().await.unwrap() {
            Message::Text(text) => assert_eq!(text.as_str(), r#"{"event":"ping"}"#),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_full_queue_reports_backpressure() {
        let (handle, _rx) = SocketHandle::channel(1);

        handle.send_text("first").unwrap();
        assert!(matches!(
            handle.send_text("second"),
            Err(DeliveryError::Backpressure)
        ));
    }

    #[tokio::test]
    async fn test_dropped_receiver_reports_closed() {
        let (handle, rx) = SocketHandle::channel(4);
        drop(rx);

        assert!(handle.is_closed());
        assert!(matches!(
            handle.send_binary(vec![1u8, 2, 3]),
            Err(DeliveryError::Closed)
        ));
    }
}
