//! Error types and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::websocket::RoomId;

// ============================================================================
// Room membership errors
// ============================================================================

/// Failure of a room membership operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    /// No registry entry exists for the user
    #[error("user {user_id} is not connected")]
    UserNotFound {
        /// User that was looked up
        user_id: String,
    },

    /// The user exists but is not a member of the room
    #[error("user {user_id} is not in room {room_id}")]
    NotInRoom {
        /// User that was looked up
        user_id: String,
        /// Room the user was expected to be in
        room_id: RoomId,
    },
}

impl RoomError {
    /// Create a `UserNotFound` error
    pub fn user_not_found(user_id: impl Into<String>) -> Self {
        Self::UserNotFound {
            user_id: user_id.into(),
        }
    }

    /// Create a `NotInRoom` error
    pub fn not_in_room(user_id: impl Into<String>, room_id: impl Into<RoomId>) -> Self {
        Self::NotInRoom {
            user_id: user_id.into(),
            room_id: room_id.into(),
        }
    }

    /// Short machine-readable code, used in error responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::UserNotFound { .. } => "USER_NOT_FOUND",
            Self::NotInRoom { .. } => "NOT_IN_ROOM",
        }
    }
}

/// Successful outcome of joining a room
///
/// Joining a room twice is not an error; callers that care can tell the
/// two cases apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomJoin {
    /// The user was added to the room
    Joined,
    /// The user was already a member, nothing changed
    AlreadyMember,
}

impl RoomJoin {
    /// Whether the membership set changed
    pub fn is_new(self) -> bool {
        matches!(self, Self::Joined)
    }
}

// ============================================================================
// Delivery errors
// ============================================================================

/// Failure to push a single frame to a live connection
///
/// Delivery errors are per recipient. Fan-out logs them and moves on.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The registry entry has no socket attached
    #[error("no live socket handle")]
    NilHandle,

    /// The payload could not be encoded as JSON
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The connection's writer has gone away
    #[error("connection closed")]
    Closed,

    /// The connection's outbound queue is full
    #[error("outbound queue full")]
    Backpressure,
}

impl DeliveryError {
    /// Short label for structured logs
    pub fn kind(&self) -> DeliveryErrorKind {
        match self {
            Self::NilHandle => DeliveryErrorKind::NilHandle,
            Self::Serialization(_) => DeliveryErrorKind::Serialization,
            Self::Closed => DeliveryErrorKind::Closed,
            Self::Backpressure => DeliveryErrorKind::Backpressure,
        }
    }
}

/// Category of delivery error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryErrorKind {
    /// No handle attached
    NilHandle,
    /// Encoding failed
    Serialization,
    /// Writer gone
    Closed,
    /// Queue full
    Backpressure,
}

impl fmt::Display for DeliveryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NilHandle => write!(f, "nil_handle"),
            Self::Serialization => write!(f, "serialization"),
            Self::Closed => write!(f, "closed"),
            Self::Backpressure => write!(f, "backpressure"),
        }
    }
}

// ============================================================================
// Middleware errors
// ============================================================================

/// Error returned by a message middleware
///
/// The message is sent back to the client verbatim in a `middleware_error`
/// reply, so it should be safe to show.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct MiddlewareError {
    /// Client-facing error text
    pub message: String,
}

impl MiddlewareError {
    /// Create a new middleware error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for MiddlewareError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for MiddlewareError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<RoomError> for MiddlewareError {
    fn from(err: RoomError) -> Self {
        Self::new(err.to_string())
    }
}

// ============================================================================
// Service errors
// ============================================================================

/// Result type alias using the service error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the service
///
/// Large error variants are boxed to reduce stack size
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Room membership error
    #[error(transparent)]
    Room(#[from] RoomError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,

    /// Optional error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// HTTP status code
    pub status: u16,
}

impl ErrorResponse {
    /// Create error response with a code
    pub fn with_code(
        status: StatusCode,
        code: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            error: error.into(),
            code: Some(code.into()),
            status: status.as_u16(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            Error::Config(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::with_code(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIG_ERROR",
                    e.to_string(),
                ),
            ),

            Error::Room(e) => {
                let status = match e {
                    RoomError::UserNotFound { .. } => StatusCode::NOT_FOUND,
                    RoomError::NotInRoom { .. } => StatusCode::CONFLICT,
                };
                (status, ErrorResponse::with_code(status, e.code(), e.to_string()))
            }

            Error::Io(e) => {
                tracing::error!("I/O error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_code(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "IO_ERROR",
                        "I/O operation failed",
                    ),
                )
            }

            Error::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorResponse::with_code(StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ),

            Error::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::with_code(StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ),

            Error::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_code(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "Internal server error",
                    ),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}
