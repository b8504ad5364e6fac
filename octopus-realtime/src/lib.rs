//! # octopus-realtime
//!
//! Real-time connection registry and message dispatch for WebSocket services.
//!
//! ## Features
//!
//! - **Client registry**: one record per user with room membership, metadata
//!   and an outbound socket handle
//! - **Rooms**: ordered, duplicate-free membership with join/leave/list
//! - **Per-connection middleware**: ordered chains with early exit and
//!   `middleware_error` replies
//! - **Broadcasting**: to a room, a user or everyone, with exclusions
//! - **Stale connection reaper**: evicts idle clients in the background
//! - **Health checks**: liveness and readiness probes
//! - **Graceful shutdown**: Proper signal handling (SIGTERM, SIGINT)
//!
//! ## Example
//!
//! ```rust,no_run
//! use octopus_realtime::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Load configuration
//!     let config = Config::load()?;
//!
//!     // Initialize tracing
//!     init_tracing(&config)?;
//!
//!     // Build application state (starts the stale connection reaper)
//!     let state = AppState::builder()
//!         .config(config.clone())
//!         .without_tracing()
//!         .build()
//!         .await?;
//!
//!     // Serve /health, /ready and the WebSocket endpoint
//!     Server::new(config).run(state).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod config;
pub mod error;
pub mod health;
pub mod ids;
pub mod middleware;
pub mod observability;
pub mod server;
pub mod state;
pub mod websocket;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::admin::{BroadcastReport, BroadcastRequest, ClientSummary};
    pub use crate::config::Config;
    pub use crate::error::{
        DeliveryError, DeliveryErrorKind, Error, MiddlewareError, Result, RoomError, RoomJoin,
    };
    pub use crate::health::{health, readiness};
    pub use crate::ids::{ConnectionKey, IdError, MakeTypedRequestId, RequestId};
    pub use crate::middleware::{
        request_id_layer, request_id_propagation_layer, sensitive_headers_layer,
        PROPAGATE_HEADERS, SENSITIVE_HEADERS,
    };
    pub use crate::observability::init_tracing;
    pub use crate::server::{build_router, Server};
    pub use crate::state::{AppState, AppStateBuilder};

    pub use crate::websocket::{
        // Broadcasting
        BroadcastData,
        BroadcastTarget,
        Broadcaster,
        // Connection handling
        BundleStore,
        ClientInfo,
        ClientMetadata,
        ClientRegistry,
        ConnectionContext,
        ConnectionState,
        Dispatch,
        Dispatcher,
        Inbound,
        Local,
        MessageEnvelope,
        // Middleware
        MessageMiddleware,
        Message as WsMessage,
        MiddlewareChain,
        RegistryConfig,
        RoomCommands,
        RoomId,
        SocketHandle,
        StaleConnectionReaper,
        // Re-exported axum types
        WebSocket,
        // Configuration
        WebSocketConfig,
        WebSocketUpgrade,
    };

    pub use axum::{
        extract::{Query, State},
        http::{HeaderMap, HeaderValue, StatusCode},
        response::{IntoResponse, Json, Response},
        routing::get,
        Router,
    };

    pub use serde::{Deserialize, Serialize};

    // Re-export tracing macros and types
    pub use tracing::{debug, error, info, instrument, trace, warn, Level, Span};

    // Re-export tokio for async runtime
    pub use tokio;

    // Re-export async-trait for async trait definitions
    pub use async_trait::async_trait;

    // Re-export error handling utilities
    pub use anyhow::{self, Context as AnyhowContext};
    pub use thiserror::Error;

    // Re-export time utilities
    pub use chrono::{DateTime, Utc};
}
