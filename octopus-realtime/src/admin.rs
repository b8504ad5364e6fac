//! Registry inspection and server-side room broadcast over HTTP
//!
//! Mounted by [`crate::server::build_router`] when `service.admin_routes` is
//! set. Identities are not verified here, the same as on the socket.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::state::AppState;
use crate::websocket::{ClientInfo, RoomId};

/// Registry record without the socket handle
#[derive(Debug, Serialize, Deserialize)]
pub struct ClientSummary {
    /// Caller-supplied identity
    pub user_id: String,

    /// Connection identifier
    pub uuid: String,

    /// When the record was created
    pub connected_at: DateTime<Utc>,

    /// Last activity
    pub last_seen: DateTime<Utc>,

    /// Joined rooms, in join order
    pub rooms: Vec<RoomId>,

    /// A live socket is attached
    pub online: bool,
}

impl From<ClientInfo> for ClientSummary {
    fn from(info: ClientInfo) -> Self {
        Self {
            online: info.has_socket(),
            rooms: info.metadata.rooms.into_iter().collect(),
            user_id: info.user_id,
            uuid: info.uuid,
            connected_at: info.connected_at,
            last_seen: info.last_seen,
        }
    }
}

/// Body of `POST /rooms/{room_id}/broadcast`
#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    /// Event name stamped on the envelope
    pub event: String,

    /// Payload; strings are sent as-is, other values as JSON
    #[serde(default)]
    pub data: Value,

    /// Users that should not receive the message
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Outcome of a room broadcast
#[derive(Debug, Serialize, Deserialize)]
pub struct BroadcastReport {
    /// Room the message was sent to
    pub room_id: RoomId,

    /// Frames queued for delivery
    pub delivered: usize,
}

/// `GET /clients`
pub async fn list_clients(State(state): State<AppState>) -> Json<Vec<ClientSummary>> {
    let mut clients: Vec<ClientSummary> = state
        .registry()
        .get_clients()
        .into_values()
        .map(ClientSummary::from)
        .collect();
    clients.sort_by(|a, b| a.user_id.cmp(&b.user_id));
    Json(clients)
}

/// `GET /clients/{user_id}`
pub async fn get_client(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<ClientSummary>> {
    let info = state
        .registry()
        .get_client(&user_id)
        .ok_or_else(|| Error::NotFound(format!("Client {} not found", user_id)))?;

    Ok(Json(info.into()))
}

/// `GET /clients/{user_id}/rooms`
pub async fn client_rooms(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<RoomId>>> {
    let rooms = state.registry().get_user_rooms(&user_id)?;
    Ok(Json(rooms))
}

/// `GET /rooms/{room_id}/clients`
pub async fn room_clients(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Json<Vec<String>> {
    let mut users: Vec<String> = state
        .registry()
        .get_clients_in_room(&room_id)
        .into_keys()
        .collect();
    users.sort();
    Json(users)
}

/// `POST /rooms/{room_id}/broadcast`
pub async fn broadcast_to_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(request): Json<BroadcastRequest>,
) -> Result<Json<BroadcastReport>> {
    if request.event.trim().is_empty() {
        return Err(Error::BadRequest("event must not be empty".to_string()));
    }

    let exclude: Vec<&str> = request.exclude.iter().map(String::as_str).collect();
    let delivered =
        state
            .broadcaster()
            .emit_to_room(&room_id, &request.event, request.data, &exclude);

    tracing::info!(room_id = %room_id, event = %request.event, delivered, "Admin room broadcast");

    Ok(Json(BroadcastReport {
        room_id: RoomId::new(room_id),
        delivered,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::SocketHandle;
    use axum::body::to_bytes;
    use axum::extract::ws::Message;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use serde_json::json;

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn state_with_lobby() -> (AppState, tokio::sync::mpsc::Receiver<Message>) {
        let state = AppState::default();
        let registry = state.registry();
        let (handle, rx) = SocketHandle::channel(8);
        registry.add_client("alice", "conn-a");
        registry.set_socket("alice", handle);
        registry.add_client("bob", "conn-b");
        registry.add_room("alice", "lobby").unwrap();
        registry.add_room("bob", "lobby").unwrap();
        (state, rx)
    }

    #[tokio::test]
    async fn test_list_clients_sorted() {
        let (state, _rx) = state_with_lobby();

        let Json(clients) = list_clients(State(state)).await;
        let users: Vec<_> = clients.iter().map(|c| c.user_id.as_str()).collect();
        assert_eq!(users, ["alice", "bob"]);
        assert!(clients[0].online);
        assert!(!clients[1].online);
        assert_eq!(clients[0].rooms, vec![RoomId::new("lobby")]);
    }

    #[tokio::test]
    async fn test_unknown_client_is_not_found() {
        let state = AppState::default();

        let response = get_client(State(state), Path("ghost".to_string()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_client_rooms_maps_room_error() {
        let (state, _rx) = state_with_lobby();

        let response = client_rooms(State(state.clone()), Path("alice".to_string()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!(["lobby"]));

        let response = client_rooms(State(state), Path("ghost".to_string()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["code"], "USER_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_room_clients_lists_members() {
        let (state, _rx) = state_with_lobby();

        let Json(users) = room_clients(State(state.clone()), Path("lobby".to_string())).await;
        assert_eq!(users, ["alice", "bob"]);

        let Json(users) = room_clients(State(state), Path("empty".to_string())).await;
        assert!(users.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_live_members() {
        let (state, mut rx) = state_with_lobby();
        let request = BroadcastRequest {
            event: "notice".to_string(),
            data: json!("maintenance at noon"),
            exclude: vec![],
        };

        let Json(report) = broadcast_to_room(State(state), Path("lobby".to_string()), Json(request))
            .await
            .unwrap();
        // bob has no socket attached
        assert_eq!(report.delivered, 1);

        let Message::Text(frame) = rx.recv().await.unwrap() else {
            panic!("expected text frame");
        };
        let envelope: Value = serde_json::from_str(frame.as_str()).unwrap();
        assert_eq!(envelope["event"], "notice");
        assert_eq!(envelope["data"], "maintenance at noon");
        assert_eq!(envelope["from"], "server");
    }

    #[tokio::test]
    async fn test_broadcast_rejects_empty_event() {
        let (state, mut rx) = state_with_lobby();
        let request = BroadcastRequest {
            event: "  ".to_string(),
            data: Value::Null,
            exclude: vec![],
        };

        let response = broadcast_to_room(State(state), Path("lobby".to_string()), Json(request))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
        assert!(rx.try_recv().is_err());
    }
}
