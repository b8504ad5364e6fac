//! Real-time connection registry and message dispatch
//!
//! WebSocket connections upgrade from HTTP on the same port. Each
//! connection is tracked in three places:
//!
//! - the [`ClientRegistry`], keyed by user, holding room membership,
//!   metadata and the outbound [`SocketHandle`]
//! - the [`BundleStore`], keyed by [`ConnectionKey`](crate::ids::ConnectionKey),
//!   holding the middleware chain bound to the connection
//! - its own [`Dispatcher`], which runs every inbound message through the
//!   chain and replies, echoes or reports a `middleware_error`
//!
//! The [`Broadcaster`] fans messages out to rooms, users or everyone using
//! the registry's socket handles.
//!
//! ## Example
//!
//! ```rust,ignore
//! use octopus_realtime::prelude::*;
//! use octopus_realtime::websocket::from_fn;
//!
//! let state = AppState::builder()
//!     .middleware(from_fn("require_user", |ctx| {
//!         ctx.user_id().map(|_| ()).ok_or_else(|| "login required".into())
//!     }))
//!     .build()
//!     .await?;
//!
//! Server::new(state.config().clone()).serve(build_router(state)).await?;
//! ```

mod broadcast;
mod bundle;
mod commands;
mod config;
mod context;
mod dispatcher;
pub mod events;
mod handler;
mod messages;
mod middleware;
mod reaper;
mod registry;
mod rooms;
mod session;

// Re-exports
pub use broadcast::{BroadcastData, BroadcastTarget, Broadcaster};
pub use bundle::{BundleStore, ConnectionBundle};
pub use commands::RoomCommands;
pub use config::{RegistryConfig, WebSocketConfig};
pub use context::{keys, ConnectionContext, Local};
pub use dispatcher::{ConnectionState, Dispatch, Dispatcher};
pub use handler::SocketHandle;
pub use messages::{Inbound, MessageEnvelope, MiddlewareErrorReply, SERVER_SENDER};
pub use middleware::{from_fn, FnMiddleware, MessageMiddleware, MiddlewareChain};
pub use reaper::StaleConnectionReaper;
pub use registry::{ClientInfo, ClientMetadata, ClientRegistry};
pub use rooms::RoomId;
pub use session::{handle_socket, ws_handler, ConnectParams};

// Re-export axum WebSocket types for convenience
pub use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
