//! Health check handlers

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::state::AppState;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service name
    pub service: String,

    /// Version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Users in the client registry
    pub connections: usize,

    /// Live connection bundles
    pub bundles: usize,
}

/// Readiness check response with dependency status
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadinessResponse {
    /// Overall readiness status
    pub ready: bool,

    /// Service name
    pub service: String,

    /// Dependency statuses
    pub dependencies: HashMap<String, DependencyStatus>,
}

/// Individual dependency status
#[derive(Debug, Serialize, Deserialize)]
pub struct DependencyStatus {
    /// Dependency is healthy
    pub healthy: bool,

    /// Optional message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Simple health check (liveness probe)
///
/// Always returns 200 OK if the service is running.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy".to_string(),
        service: state.config().service.name.clone(),
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
        connections: state.registry().connected_count(),
        bundles: state.bundles().len(),
    };

    (StatusCode::OK, Json(response))
}

/// Readiness check (readiness probe)
///
/// Returns 503 Service Unavailable when the stale connection reaper is
/// configured but not running.
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let mut dependencies = HashMap::new();
    let mut all_ready = true;

    let reaper_expected = state.config().registry.reaper_enabled;
    let reaper_running = state.registry().reaper_active();

    let reaper = match (reaper_expected, reaper_running) {
        (true, true) => DependencyStatus {
            healthy: true,
            message: Some("Running".to_string()),
        },
        (true, false) => {
            tracing::error!("Stale connection reaper is not running");
            all_ready = false;
            DependencyStatus {
                healthy: false,
                message: Some("Not running".to_string()),
            }
        }
        (false, _) => DependencyStatus {
            healthy: true,
            message: Some("Disabled".to_string()),
        },
    };
    dependencies.insert("stale_reaper".to_string(), reaper);

    let response = ReadinessResponse {
        ready: all_ready,
        service: state.config().service.name.clone(),
        dependencies,
    };

    let status = if all_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::to_bytes;

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_connection_counts() {
        let state = AppState::default();
        state.registry().add_client("alice", "conn-1");

        let response = health(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "octopus");
        assert_eq!(body["connections"], 1);
        assert_eq!(body["bundles"], 0);
    }

    #[tokio::test]
    async fn test_readiness_fails_without_reaper() {
        // AppState::new never starts the reaper
        let state = AppState::default();

        let response = readiness(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = body_json(response).await;
        assert_eq!(body["ready"], false);
        assert_eq!(body["dependencies"]["stale_reaper"]["healthy"], false);
    }

    #[tokio::test]
    async fn test_readiness_with_reaper_disabled() {
        let mut config = Config::default();
        config.registry.reaper_enabled = false;
        let state = AppState::new(config);

        let response = readiness(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await["dependencies"]["stale_reaper"]["message"],
            "Disabled"
        );
    }

    #[tokio::test]
    async fn test_readiness_with_running_reaper() {
        let state = AppState::builder().without_tracing().build().await.unwrap();

        let response = readiness(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        state.shutdown_reaper().await;
    }
}
