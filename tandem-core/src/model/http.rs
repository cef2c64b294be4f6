use crate::model::call::{CallId, CallStatus};
use crate::model::peer::{PeerId, Role};
use crate::model::signaling::{IceServerConfig, ParticipantCount};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCallResponse {
    pub call_id: CallId,
    pub host_peer_id: PeerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSnapshot {
    pub call_id: CallId,
    pub status: CallStatus,
    pub participants: ParticipantCount,
    pub host_present: bool,
    pub guest_present: bool,
    pub expires_in_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinCallRequest {
    #[serde(default)]
    pub peer_id: Option<PeerId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinCallResponse {
    pub peer_id: PeerId,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnConfigResponse {
    #[serde(rename = "iceServers")]
    pub ice_servers: Vec<IceServerConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub calls: usize,
}
