//! WebSocket upgrade and per-socket session loop
//!
//! A session owns two halves of the socket. The writer task drains the
//! connection's bounded channel into the socket and sends keepalive pings.
//! The reader feeds text and binary frames to the [`Dispatcher`] in
//! arrival order until the client closes or the socket fails.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::context::ConnectionContext;
use super::dispatcher::Dispatcher;
use super::handler::SocketHandle;
use super::messages::Inbound;
use super::registry::ClientRegistry;
use crate::state::AppState;

/// Query parameters accepted on the upgrade request
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// User the connection belongs to; not validated
    pub user: Option<String>,
}

/// Upgrade handler mounted on `websocket.path`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let config = &state.config().websocket;
    let user = params.user.filter(|user| !user.trim().is_empty());

    ws.max_message_size(config.max_message_size_bytes)
        .max_frame_size(config.max_frame_size_bytes)
        .on_upgrade(move |socket| handle_socket(socket, user, state))
}

/// Drive one upgraded socket until it closes
pub async fn handle_socket(socket: WebSocket, user: Option<String>, state: AppState) {
    let config = &state.config().websocket;
    let (handle, rx) = SocketHandle::channel(config.channel_capacity);
    let key = handle.key().clone();
    let registry = Arc::clone(state.registry());

    let mut ctx = ConnectionContext::new(handle.clone());
    if let Some(user) = &user {
        registry.add_client(user.as_str(), key.to_string());
        registry.set_socket(user, handle);
        ctx = ctx.with_user(user.as_str());
    }

    let mut dispatcher =
        Dispatcher::accept(Arc::clone(state.bundles()), ctx, state.chain().clone());

    tracing::info!(
        connection_key = %key,
        user_id = user.as_deref().unwrap_or("-"),
        "WebSocket connection opened"
    );

    let (sink, stream) = socket.split();
    let token = CancellationToken::new();
    let writer = tokio::spawn(write_frames(
        sink,
        rx,
        token.clone(),
        config.ping_interval(),
    ));

    read_frames(stream, &mut dispatcher, &registry, user.as_deref()).await;

    dispatcher.on_disconnect();
    if let Some(user) = &user {
        registry.remove_connection(user, key.as_str());
    }
    token.cancel();
    if let Err(e) = writer.await {
        tracing::warn!(connection_key = %key, error = %e, "WebSocket writer ended abnormally");
    }

    tracing::info!(connection_key = %key, "WebSocket connection closed");
}

/// Forward queued frames to the socket until cancelled or every sender is gone
///
/// A zero `ping_interval` disables keepalive pings.
pub(crate) async fn write_frames<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<Message>,
    token: CancellationToken,
    ping_interval: Duration,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let pings = !ping_interval.is_zero();
    let mut ticker = tokio::time::interval(ping_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        let frame = tokio::select! {
            () = token.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            _ = ticker.tick(), if pings => Message::Ping(Bytes::new()),
        };

        if let Err(e) = sink.send(frame).await {
            tracing::debug!(error = %e, "WebSocket write failed");
            return;
        }
    }

    if let Err(e) = sink.close().await {
        tracing::debug!(error = %e, "WebSocket close failed");
    }
}

/// Dispatch inbound frames until the client closes or the stream fails
pub(crate) async fn read_frames<R, E>(
    mut stream: R,
    dispatcher: &mut Dispatcher,
    registry: &ClientRegistry,
    user: Option<&str>,
) where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let touch = |registry: &ClientRegistry| {
        if let Some(user) = user {
            registry.update_last_seen(user);
        }
    };

    while let Some(frame) = stream.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(connection_key = %dispatcher.key(), error = %e, "WebSocket read failed");
                dispatcher.on_disconnect();
                return;
            }
        };

        match message {
            Message::Close(_) => {
                dispatcher.on_close();
                return;
            }
            // pong replies are queued by the protocol layer
            Message::Ping(_) | Message::Pong(_) => touch(registry),
            message => {
                if let Some(inbound) = Inbound::from_message(message) {
                    touch(registry);
                    dispatcher.on_message(inbound).await;
                }
            }
        }
    }

    dispatcher.on_disconnect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::{BundleStore, ConnectionState, MiddlewareChain};
    use chrono::{TimeDelta, Utc};
    use futures::stream;

    #[tokio::test]
    async fn test_writer_drains_queue_until_senders_drop() {
        let (handle, rx) = SocketHandle::channel(8);
        handle.send_text("one").unwrap();
        handle.send_binary(vec![2u8]).unwrap();
        drop(handle);

        let mut frames: Vec<Message> = Vec::new();
        write_frames(&mut frames, rx, CancellationToken::new(), Duration::ZERO).await;

        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[0], Message::Text(t) if t.as_str() == "one"));
        assert!(matches!(&frames[1], Message::Binary(b) if b[..] == [2u8]));
    }

    #[tokio::test]
    async fn test_writer_sends_pings_until_cancelled() {
        let (_handle, rx) = SocketHandle::channel(8);
        let token = CancellationToken::new();
        let canceller = token.clone();

        let writer = tokio::spawn(async move {
            let mut frames: Vec<Message> = Vec::new();
            write_frames(&mut frames, rx, token, Duration::from_millis(10)).await;
            frames
        });
        tokio::time::sleep(Duration::from_millis(60)).await;
        canceller.cancel();

        let frames = writer.await.unwrap();
        assert!(!frames.is_empty());
        assert!(frames.iter().all(|f| matches!(f, Message::Ping(_))));
    }

    #[tokio::test]
    async fn test_reader_dispatches_in_order_then_closes() {
        let registry = ClientRegistry::new();
        registry.add_client("alice", "conn-1");
        registry.update("alice", |info| {
            info.last_seen = Utc::now() - TimeDelta::minutes(5);
        });
        let before = registry.get_client("alice").unwrap().last_seen;

        let (handle, mut rx) = SocketHandle::channel(8);
        let mut dispatcher = Dispatcher::accept(
            Arc::new(BundleStore::new()),
            ConnectionContext::new(handle).with_user("alice"),
            MiddlewareChain::default(),
        );

        let frames = stream::iter(vec![
            Ok::<_, String>(Message::Text("first".into())),
            Ok(Message::Binary(Bytes::from_static(&[9]))),
            Ok(Message::Close(None)),
            Ok(Message::Text("after close".into())),
        ]);
        read_frames(frames, &mut dispatcher, &registry, Some("alice")).await;

        assert!(matches!(rx.try_recv().unwrap(), Message::Text(t) if t.as_str() == "first"));
        assert!(matches!(rx.try_recv().unwrap(), Message::Binary(b) if b[..] == [9u8]));
        assert!(rx.try_recv().is_err());
        assert_eq!(dispatcher.state(), ConnectionState::Closed);
        assert!(registry.get_client("alice").unwrap().last_seen > before);
    }

    #[tokio::test]
    async fn test_reader_error_disconnects() {
        let registry = ClientRegistry::new();
        let store = Arc::new(BundleStore::new());
        let (handle, _rx) = SocketHandle::channel(8);
        let mut dispatcher = Dispatcher::accept(
            Arc::clone(&store),
            ConnectionContext::new(handle),
            MiddlewareChain::default(),
        );
        assert_eq!(store.len(), 1);

        let frames = stream::iter(vec![Err::<Message, _>("reset".to_string())]);
        read_frames(frames, &mut dispatcher, &registry, None).await;

        assert_eq!(dispatcher.state(), ConnectionState::Closed);
        assert!(store.is_empty());
    }
}
