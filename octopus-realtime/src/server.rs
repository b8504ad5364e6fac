//! HTTP server with graceful shutdown

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::CorsLayer,
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

use crate::{
    admin::{broadcast_to_room, client_rooms, get_client, list_clients, room_clients},
    config::Config,
    error::Result,
    health::{health, readiness},
    middleware::{request_id_layer, request_id_propagation_layer, sensitive_headers_layer},
    state::AppState,
    websocket::ws_handler,
};

/// Routes for the health probes, the WebSocket endpoint and, when enabled,
/// the admin routes
pub fn build_router(state: AppState) -> Router {
    let path = state.config().websocket.path.trim();
    // axum rejects routes without a leading slash
    let ws_path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };

    let mut router = Router::new()
        .route("/health", get(health))
        .route("/ready", get(readiness))
        .route(&ws_path, get(ws_handler));

    if state.config().service.admin_routes {
        router = router
            .route("/clients", get(list_clients))
            .route("/clients/{user_id}", get(get_client))
            .route("/clients/{user_id}/rooms", get(client_rooms))
            .route("/rooms/{room_id}/clients", get(room_clients))
            .route("/rooms/{room_id}/broadcast", post(broadcast_to_room));
    }

    router.with_state(state)
}

/// Server instance
pub struct Server {
    config: Config,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Serve [`build_router`] for `state`, then stop its reaper
    pub async fn run(self, state: AppState) -> Result<()> {
        let app = build_router(state.clone());
        let served = self.serve(app).await;
        state.shutdown_reaper().await;
        served
    }

    /// Run the server with the given router
    pub async fn serve(self, app: Router) -> Result<()> {
        let addr = self.config.bind_address();

        tracing::info!("Starting {} on {}", self.config.service.name, addr);

        self.log_middleware_config();

        let app = self.apply_layers(app);

        let listener = TcpListener::bind(addr.as_str()).await?;

        tracing::info!("Server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Server shutdown complete");

        Ok(())
    }

    /// Wrap `app` in the configured middleware stack
    ///
    /// Layers added later wrap the earlier ones.
    fn apply_layers(&self, app: Router) -> Router {
        let middleware = &self.config.middleware;
        let tracking = &middleware.request_tracking;
        let body_limit = middleware.body_limit_mb * 1024 * 1024;

        let mut app = app;

        if let Some(cors_layer) = self.build_cors_layer() {
            app = app.layer(cors_layer);
        }

        app = app
            .layer(TimeoutLayer::with_status_code(
                http::StatusCode::REQUEST_TIMEOUT,
                self.config.service.timeout(),
            ))
            .layer(RequestBodyLimitLayer::new(body_limit))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().include_headers(true))
                    .on_response(DefaultOnResponse::new().include_headers(true)),
            );

        if tracking.mask_sensitive_headers {
            app = app.layer(sensitive_headers_layer());
        }
        if tracking.propagate_headers {
            app = app.layer(request_id_propagation_layer());
        }
        if tracking.request_id_enabled {
            app = app.layer(request_id_layer());
        }
        if middleware.catch_panic {
            app = app.layer(CatchPanicLayer::new());
        }

        app
    }

    /// Log middleware configuration for debugging
    fn log_middleware_config(&self) {
        let middleware = &self.config.middleware;
        let tracking = &middleware.request_tracking;

        tracing::info!("Middleware configuration:");
        tracing::info!("  - Panic recovery: {}", middleware.catch_panic);
        tracing::info!("  - Request ID tracking: {}", tracking.request_id_enabled);
        tracing::info!("  - Header propagation: {}", tracking.propagate_headers);
        tracing::info!(
            "  - Sensitive header masking: {}",
            tracking.mask_sensitive_headers
        );
        tracing::info!("  - Request body limit: {} MB", middleware.body_limit_mb);
        tracing::info!("  - CORS mode: {}", middleware.cors_mode);
        tracing::info!(
            "  - Request timeout: {} seconds",
            self.config.service.timeout_secs
        );
        tracing::info!(
            "  - WebSocket: {} (queue {}, ping every {}s)",
            self.config.websocket.path,
            self.config.websocket.channel_capacity,
            self.config.websocket.ping_interval_secs
        );

        if self.config.registry.reaper_enabled {
            tracing::info!(
                "  - Stale connection reaper: every {}s, idle after {}s",
                self.config.registry.reap_interval_secs,
                self.config.registry.stale_after_secs
            );
        } else {
            tracing::info!("  - Stale connection reaper: disabled");
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Build CORS layer based on configuration
    fn build_cors_layer(&self) -> Option<CorsLayer> {
        match self.config.middleware.cors_mode.as_str() {
            "permissive" => {
                tracing::debug!("Enabling permissive CORS");
                Some(CorsLayer::permissive())
            }
            "restrictive" => {
                tracing::debug!("Enabling restrictive CORS (default deny)");
                Some(CorsLayer::new())
            }
            "disabled" => {
                tracing::debug!("CORS disabled");
                None
            }
            _ => {
                tracing::warn!(
                    "Unknown CORS mode: {}, defaulting to permissive",
                    self.config.middleware.cors_mode
                );
                Some(CorsLayer::permissive())
            }
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    tracing::info!("Shutdown signal received, closing connections...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[test]
    fn test_server_creation() {
        let config = Config::default();
        let server = Server::new(config.clone());
        assert_eq!(server.config().service.port, config.service.port);
    }

    #[test]
    fn test_disabled_cors_skips_layer() {
        let mut config = Config::default();
        config.middleware.cors_mode = "disabled".to_string();
        assert!(Server::new(config).build_cors_layer().is_none());
        assert!(Server::new(Config::default()).build_cors_layer().is_some());
    }

    #[tokio::test]
    async fn test_router_serves_health_with_request_id() {
        let state = AppState::default();
        let server = Server::new(state.config().clone());
        let app = server.apply_layers(build_router(state));

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let request_id = response.headers().get("x-request-id").unwrap();
        assert!(request_id.to_str().unwrap().starts_with("req_"));
    }

    #[tokio::test]
    async fn test_admin_routes_follow_config() {
        let state = AppState::default();
        state.registry().add_client("alice", "conn-1");

        let response = build_router(state)
            .oneshot(Request::get("/clients/alice/rooms").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut config = Config::default();
        config.service.admin_routes = false;
        let response = build_router(AppState::new(config))
            .oneshot(Request::get("/clients").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_error_is_json() {
        let response = build_router(AppState::default())
            .oneshot(Request::get("/clients/ghost").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], 404);
        assert_eq!(body["error"], "Client ghost not found");
    }

    #[test]
    fn test_bind_address_uses_port() {
        let mut config = Config::default();
        config.service.port = 9100;
        assert_eq!(config.bind_address(), "0.0.0.0:9100");
    }

    #[tokio::test]
    async fn test_ws_route_requires_upgrade() {
        let app = build_router(AppState::default());

        let response = app
            .oneshot(Request::get("/ws?user=alice").body(Body::empty()).unwrap())
            .await
            .unwrap();

        // plain GET without upgrade headers is rejected by the extractor
        assert!(response.status().is_client_error());
    }
}
