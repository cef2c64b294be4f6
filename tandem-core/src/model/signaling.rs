use crate::error::ProtocolError;
use crate::model::call::CallStatus;
use crate::model::peer::{PeerId, Role};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServerConfig {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Every message type the signaling protocol knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Join,
    State,
    Offer,
    Answer,
    IceCandidate,
    Leave,
    PeerDisconnected,
    PeerReconnected,
    RenegotiateRequest,
}

impl MessageType {
    pub const ALL: [MessageType; 9] = [
        MessageType::Join,
        MessageType::State,
        MessageType::Offer,
        MessageType::Answer,
        MessageType::IceCandidate,
        MessageType::Leave,
        MessageType::PeerDisconnected,
        MessageType::PeerReconnected,
        MessageType::RenegotiateRequest,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Join => "join",
            MessageType::State => "state",
            MessageType::Offer => "offer",
            MessageType::Answer => "answer",
            MessageType::IceCandidate => "ice-candidate",
            MessageType::Leave => "leave",
            MessageType::PeerDisconnected => "peer-disconnected",
            MessageType::PeerReconnected => "peer-reconnected",
            MessageType::RenegotiateRequest => "renegotiate-request",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Negotiation payloads the server forwards verbatim to the other participant.
    pub fn is_relayed(self) -> bool {
        matches!(
            self,
            MessageType::Offer
                | MessageType::Answer
                | MessageType::IceCandidate
                | MessageType::RenegotiateRequest
        )
    }

    /// Messages that lose their meaning if delivered late. Never queued while offline.
    pub fn is_time_sensitive(self) -> bool {
        self.is_relayed()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire unit of the signaling protocol: `{type, data?, from?}`.
///
/// `kind` stays a plain string so that newer message types survive a trip through an
/// older relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<PeerId>,
}

impl Envelope {
    pub fn new<T: Serialize>(kind: MessageType, data: &T) -> Result<Self, ProtocolError> {
        let data = serde_json::to_value(data).map_err(|source| ProtocolError::InvalidData {
            kind: kind.to_string(),
            source,
        })?;
        Ok(Self {
            kind: kind.as_str().to_owned(),
            data: Some(data),
            from: None,
        })
    }

    pub fn bare(kind: MessageType) -> Self {
        Self {
            kind: kind.as_str().to_owned(),
            data: None,
            from: None,
        }
    }

    pub fn with_from(mut self, from: PeerId) -> Self {
        self.from = Some(from);
        self
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Malformed)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Malformed)
    }

    pub fn message_type(&self) -> Result<MessageType, ProtocolError> {
        MessageType::parse(&self.kind).ok_or_else(|| ProtocolError::UnknownType(self.kind.clone()))
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        let data = self
            .data
            .clone()
            .ok_or_else(|| ProtocolError::MissingData(self.kind.clone()))?;
        serde_json::from_value(data).map_err(|source| ProtocolError::InvalidData {
            kind: self.kind.clone(),
            source,
        })
    }
}

/// Sent by the server to a socket right after it has been admitted to a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinPayload {
    pub peer_id: PeerId,
    pub role: Role,
    pub is_reconnect: bool,
    pub peer_online: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantCount {
    pub count: u8,
}

/// Broadcast to both sockets on every presence or status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePayload {
    pub status: CallStatus,
    pub participants: ParticipantCount,
}

impl StatePayload {
    pub fn new(status: CallStatus, count: u8) -> Self {
        Self {
            status,
            participants: ParticipantCount { count },
        }
    }
}

/// Payload of `peer-disconnected` and `peer-reconnected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresencePayload {
    pub peer_id: PeerId,
    #[serde(default)]
    pub is_reconnect: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Browser-compatible session description (`{type, sdp}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Browser-compatible ICE candidate (`RTCIceCandidateInit`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }
}
