//! Per-connection message dispatch
//!
//! Each accepted connection gets its own [`Dispatcher`]. Binding stores a
//! [`ConnectionBundle`] in the shared [`BundleStore`] and keeps a reference
//! on the dispatcher, so the hot path never searches a global table. The
//! store stays authoritative: once a bundle is evicted there, the
//! dispatcher drops its reference on the next message.
//!
//! Lifecycle: `Connecting -> Bound -> Active -> Closed`.

use std::sync::Arc;

use serde_json::Value;

use super::bundle::{BundleStore, ConnectionBundle};
use super::context::{keys, ConnectionContext, Local};
use super::handler::SocketHandle;
use super::messages::{Inbound, MessageEnvelope, MiddlewareErrorReply};
use super::middleware::MiddlewareChain;
use crate::error::{DeliveryError, MiddlewareError};
use crate::ids::ConnectionKey;

/// Lifecycle state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Accepted, no middleware bound yet
    Connecting,
    /// Bundle stored, no message handled yet
    Bound,
    /// At least one message ran through the chain
    Active,
    /// Disconnected or closed
    Closed,
}

/// What happened to one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// No bundle was bound, the payload was echoed
    Unbound,
    /// The chain succeeded without a response, the payload was echoed
    Echoed,
    /// The chain succeeded and its response was sent
    Responded,
    /// A middleware failed and a `middleware_error` reply was sent
    Rejected(MiddlewareError),
    /// Nothing was sent: the connection closed or its bundle was evicted
    /// while the chain ran
    Dropped,
}

/// Dispatches events for one connection
#[derive(Debug)]
pub struct Dispatcher {
    store: Arc<BundleStore>,
    ctx: ConnectionContext,
    bundle: Option<Arc<ConnectionBundle>>,
    state: ConnectionState,
}

impl Dispatcher {
    /// Dispatcher for a connection with no middleware bound
    #[must_use]
    pub fn new(store: Arc<BundleStore>, ctx: ConnectionContext) -> Self {
        Self {
            store,
            ctx,
            bundle: None,
            state: ConnectionState::Connecting,
        }
    }

    /// Accept a connection and bind `chain` to it
    #[must_use]
    pub fn accept(store: Arc<BundleStore>, ctx: ConnectionContext, chain: MiddlewareChain) -> Self {
        let mut dispatcher = Self::new(store, ctx);
        dispatcher.bind(chain);
        dispatcher
    }

    /// Store a bundle for this connection and record its key
    pub fn bind(&mut self, chain: MiddlewareChain) -> ConnectionKey {
        let key = self.ctx.key().clone();
        let bundle = Arc::new(ConnectionBundle {
            handle: self.ctx.handle().clone(),
            chain,
        });

        self.ctx.set_attribute(keys::CONNECTION_KEY, key.to_string());
        self.store.insert(key.clone(), Arc::clone(&bundle));
        self.bundle = Some(bundle);
        self.state = ConnectionState::Bound;

        key
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Key of the connection
    #[must_use]
    pub fn key(&self) -> &ConnectionKey {
        self.ctx.key()
    }

    /// Connection context
    #[must_use]
    pub fn context(&self) -> &ConnectionContext {
        &self.ctx
    }

    /// Mutable connection context
    pub fn context_mut(&mut self) -> &mut ConnectionContext {
        &mut self.ctx
    }

    /// Bound bundle, if the store still has it
    fn current_bundle(&mut self) -> Option<Arc<ConnectionBundle>> {
        let bundle = self.bundle.as_ref()?;
        if self.store.contains(self.ctx.key()) {
            return Some(Arc::clone(bundle));
        }

        tracing::debug!(connection_key = %self.ctx.key(), "Bundle evicted from store, unbinding");
        self.bundle = None;
        self.ctx.remove_attribute(keys::CONNECTION_KEY);
        None
    }

    /// Handle one inbound data frame
    ///
    /// Message locals are always cleared before this returns.
    pub async fn on_message(&mut self, inbound: Inbound) -> Dispatch {
        if self.state == ConnectionState::Closed {
            return Dispatch::Dropped;
        }

        let Some(bundle) = self.current_bundle() else {
            log_failure(self.ctx.key(), "echo", self.ctx.handle().send(inbound.to_message()));
            return Dispatch::Unbound;
        };
        self.state = ConnectionState::Active;

        let envelope = MessageEnvelope::parse(inbound.as_bytes());
        self.ctx.inject_message(&inbound, &envelope);

        let result = bundle.chain.run(&mut self.ctx).await;

        let outcome = if !self.store.contains(self.ctx.key()) {
            tracing::debug!(connection_key = %self.ctx.key(), "Bundle evicted during dispatch, dropping reply");
            Dispatch::Dropped
        } else {
            match result {
                Err(e) => {
                    let reply = MiddlewareErrorReply::new(&e.message, &envelope);
                    log_failure(self.ctx.key(), "middleware error", bundle.handle.send_json(&reply));
                    Dispatch::Rejected(e)
                }
                Ok(()) => match self.ctx.take_response() {
                    Some(response) => {
                        log_failure(self.ctx.key(), "response", respond(&bundle.handle, response));
                        Dispatch::Responded
                    }
                    None => {
                        log_failure(self.ctx.key(), "echo", bundle.handle.send(inbound.to_message()));
                        Dispatch::Echoed
                    }
                },
            }
        };

        self.ctx.clear_message_locals();
        outcome
    }

    /// The transport reported an abnormal disconnect
    pub fn on_disconnect(&mut self) {
        self.evict("disconnect");
    }

    /// The peer closed the connection
    pub fn on_close(&mut self) {
        self.evict("close");
    }

    fn evict(&mut self, reason: &'static str) {
        self.store.remove(self.ctx.key());
        self.bundle = None;
        self.ctx.remove_attribute(keys::CONNECTION_KEY);
        self.ctx.clear_message_locals();

        if self.state != ConnectionState::Closed {
            tracing::debug!(connection_key = %self.ctx.key(), reason, "Connection unbound");
            self.state = ConnectionState::Closed;
        }
    }
}

/// Send a middleware response according to its type
fn respond(handle: &SocketHandle, response: Local) -> Result<(), DeliveryError> {
    match response {
        Local::Text(text) => handle.send_text(text),
        Local::Bytes(bytes) => handle.send_binary(bytes),
        Local::Json(Value::String(text)) => handle.send_text(text),
        Local::Json(value) => handle.send_json(&value),
        Local::Envelope(envelope) => handle.send_json(&envelope),
    }
}

fn log_failure(key: &ConnectionKey, what: &'static str, result: Result<(), DeliveryError>) {
    if let Err(e) = result {
        tracing::warn!(connection_key = %key, kind = %e.kind(), error = %e, "Failed to send {}", what);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::{from_fn, MessageMiddleware};
    use async_trait::async_trait;
    use axum::extract::ws::Message;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;

    fn connection() -> (ConnectionContext, mpsc::Receiver<Message>) {
        let (handle, rx) = SocketHandle::channel(16);
        (ConnectionContext::new(handle).with_user("alice"), rx)
    }

    fn text(frame: Message) -> String {
        match frame {
            Message::Text(text) => text.as_str().to_string(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    struct Flag(Arc<AtomicBool>);

    #[async_trait]
    impl MessageMiddleware for Flag {
        async fn handle(&self, _ctx: &mut ConnectionContext) -> Result<(), MiddlewareError> {
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_accept_binds_bundle() {
        let store = Arc::new(BundleStore::new());
        let (ctx, _rx) = connection();
        let dispatcher = Dispatcher::accept(Arc::clone(&store), ctx, MiddlewareChain::default());

        assert_eq!(dispatcher.state(), ConnectionState::Bound);
        assert!(store.contains(dispatcher.key()));
        assert_eq!(
            dispatcher.context().attribute(keys::CONNECTION_KEY),
            Some(dispatcher.key().as_str())
        );
    }

    #[tokio::test]
    async fn test_unbound_connection_echoes_bytes() {
        let store = Arc::new(BundleStore::new());
        let (ctx, mut rx) = connection();
        let mut dispatcher = Dispatcher::new(store, ctx);

        let payload = vec![0xde_u8, 0xad, 0xbe, 0xef];
        let outcome = dispatcher.on_message(Inbound::from(payload.clone())).await;

        assert_eq!(outcome, Dispatch::Unbound);
        match rx.recv().await.unwrap() {
            Message::Binary(bytes) => assert_eq!(bytes.as_ref(), payload.as_slice()),
            other => panic!("expected binary echo, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_chain_echoes_text() {
        let store = Arc::new(BundleStore::new());
        let (ctx, mut rx) = connection();
        let mut dispatcher = Dispatcher::accept(store, ctx, MiddlewareChain::default());

        let outcome = dispatcher.on_message(Inbound::from("hello")).await;

        assert_eq!(outcome, Dispatch::Echoed);
        assert_eq!(dispatcher.state(), ConnectionState::Active);
        assert_eq!(text(rx.recv().await.unwrap()), "hello");
    }

    #[tokio::test]
    async fn test_error_stops_chain_and_discards_response() {
        let store = Arc::new(BundleStore::new());
        let (ctx, mut rx) = connection();
        let second_ran = Arc::new(AtomicBool::new(false));

        let chain = MiddlewareChain::default()
            .with(from_fn("m1", |ctx| {
                ctx.set_response("ok");
                Err("not allowed".into())
            }))
            .with(Flag(Arc::clone(&second_ran)));
        let mut dispatcher = Dispatcher::accept(store, ctx, chain);

        let outcome = dispatcher.on_message(Inbound::from("ping")).await;

        assert_eq!(outcome, Dispatch::Rejected(MiddlewareError::new("not allowed")));
        assert!(!second_ran.load(Ordering::SeqCst));

        let reply: Value = serde_json::from_str(&text(rx.recv().await.unwrap())).unwrap();
        assert_eq!(
            reply,
            json!({
                "type": "middleware_error",
                "error": "not allowed",
                "message": {"data": "ping", "from": "", "event": "message", "to": ""}
            })
        );
        assert!(rx.try_recv().is_err());
        assert!(dispatcher.context().response().is_none());
    }

    #[tokio::test]
    async fn test_response_dispatch_by_type() {
        let store = Arc::new(BundleStore::new());
        let (ctx, mut rx) = connection();
        let chain = MiddlewareChain::default().with(from_fn("reply", |ctx| {
            match ctx.envelope().map(|e| e.data.clone()).as_deref() {
                Some("json") => ctx.set_response(json!({"ok": true})),
                Some("bytes") => ctx.set_response(vec![1u8, 2, 3]),
                Some("string") => ctx.set_response(json!("ok")),
                _ => ctx.set_response("plain"),
            }
            Ok(())
        }));
        let mut dispatcher = Dispatcher::accept(store, ctx, chain);

        assert_eq!(
            dispatcher.on_message(Inbound::from(r#"{"data":"json"}"#)).await,
            Dispatch::Responded
        );
        assert_eq!(text(rx.recv().await.unwrap()), r#"{"ok":true}"#);

        dispatcher.on_message(Inbound::from(r#"{"data":"bytes"}"#)).await;
        assert!(matches!(rx.recv().await.unwrap(), Message::Binary(b) if b[..] == [1u8, 2, 3]));

        dispatcher.on_message(Inbound::from(r#"{"data":"string"}"#)).await;
        assert_eq!(text(rx.recv().await.unwrap()), "ok");

        dispatcher.on_message(Inbound::from("anything")).await;
        assert_eq!(text(rx.recv().await.unwrap()), "plain");
    }

    #[tokio::test]
    async fn test_locals_do_not_leak_between_messages() {
        let store = Arc::new(BundleStore::new());
        let (ctx, mut rx) = connection();
        let chain = MiddlewareChain::default().with(from_fn("once", |ctx| {
            if ctx.event() == Some("set") {
                ctx.set_response("set");
            }
            Ok(())
        }));
        let mut dispatcher = Dispatcher::accept(store, ctx, chain);

        dispatcher.on_message(Inbound::from(r#"{"event":"set"}"#)).await;
        assert_eq!(text(rx.recv().await.unwrap()), "set");

        let outcome = dispatcher.on_message(Inbound::from("second")).await;
        assert_eq!(outcome, Dispatch::Echoed);
        assert_eq!(text(rx.recv().await.unwrap()), "second");

        for key in keys::MESSAGE_LOCALS {
            assert!(dispatcher.context().local(key).is_none());
        }
    }

    #[tokio::test]
    async fn test_store_eviction_unbinds_dispatcher() {
        let store = Arc::new(BundleStore::new());
        let (ctx, mut rx) = connection();
        let chain = MiddlewareChain::default().with(from_fn("reply", |ctx| {
            ctx.set_response("handled");
            Ok(())
        }));
        let mut dispatcher = Dispatcher::accept(Arc::clone(&store), ctx, chain);

        assert!(store.remove(dispatcher.key()));

        let outcome = dispatcher.on_message(Inbound::from("raw")).await;
        assert_eq!(outcome, Dispatch::Unbound);
        assert_eq!(text(rx.recv().await.unwrap()), "raw");
        assert!(dispatcher.context().attribute(keys::CONNECTION_KEY).is_none());
    }

    #[tokio::test]
    async fn test_eviction_during_chain_drops_reply() {
        let store = Arc::new(BundleStore::new());
        let (ctx, mut rx) = connection();
        let evicting = Arc::clone(&store);
        let chain = MiddlewareChain::default().with(from_fn("evict", move |ctx| {
            evicting.remove(ctx.key());
            ctx.set_response("late");
            Ok(())
        }));
        let mut dispatcher = Dispatcher::accept(store, ctx, chain);

        let outcome = dispatcher.on_message(Inbound::from("hi")).await;

        assert_eq!(outcome, Dispatch::Dropped);
        assert!(rx.try_recv().is_err());
        assert!(dispatcher.context().response().is_none());
    }

    #[tokio::test]
    async fn test_close_and_disconnect_are_idempotent() {
        let store = Arc::new(BundleStore::new());
        let (ctx, mut rx) = connection();
        let mut dispatcher = Dispatcher::accept(Arc::clone(&store), ctx, MiddlewareChain::default());

        dispatcher.on_disconnect();
        dispatcher.on_close();
        dispatcher.on_disconnect();

        assert_eq!(dispatcher.state(), ConnectionState::Closed);
        assert!(store.is_empty());
        assert_eq!(dispatcher.on_message(Inbound::from("late")).await, Dispatch::Dropped);
        assert!(rx.try_recv().is_err());
    }
}
