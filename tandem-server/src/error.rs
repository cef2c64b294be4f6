use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tandem_core::{CallId, ErrorBody, PeerId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("call {0} does not exist")]
    RoomNotFound(CallId),

    #[error("call {0} already has two participants")]
    RoomFull(CallId),

    #[error("call {0} has ended")]
    RoomEnded(CallId),

    #[error("peer {peer_id} is not a participant of call {call_id}")]
    UnknownPeer { call_id: CallId, peer_id: PeerId },

    #[error("call {0} stopped responding")]
    StoreUnavailable(CallId),
}

impl CallError {
    pub fn code(&self) -> &'static str {
        match self {
            CallError::RoomNotFound(_) => "room_not_found",
            CallError::RoomFull(_) => "room_full",
            CallError::RoomEnded(_) => "room_ended",
            CallError::UnknownPeer { .. } => "unknown_peer",
            CallError::StoreUnavailable(_) => "store_unavailable",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            CallError::RoomNotFound(_) => StatusCode::NOT_FOUND,
            CallError::RoomFull(_) => StatusCode::CONFLICT,
            CallError::RoomEnded(_) => StatusCode::GONE,
            CallError::UnknownPeer { .. } => StatusCode::FORBIDDEN,
            CallError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for CallError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.code().to_owned(),
            message: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("failed to derive TURN credentials: {0}")]
    Generation(String),
}
