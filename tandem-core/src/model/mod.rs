mod call;
mod http;
mod peer;
mod signaling;

pub use call::{CallId, CallStatus};
pub use http::{
    CallSnapshot, CreateCallResponse, ErrorBody, HealthResponse, JoinCallRequest,
    JoinCallResponse, TurnConfigResponse,
};
pub use peer::{PeerId, Role};
pub use signaling::{
    Envelope, IceCandidate, IceServerConfig, JoinPayload, MessageType, ParticipantCount,
    PresencePayload, SdpType, SessionDescription, StatePayload,
};
