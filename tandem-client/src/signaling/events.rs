use crate::error::SignalingError;
use std::time::Duration;
use tandem_core::{
    Envelope, IceCandidate, JoinPayload, MessageType, PeerId, PresencePayload,
    SessionDescription, StatePayload,
};
use tracing::warn;

/// One method per signaling event. Implementations are called from the socket
/// task and must not block; forwarding into a channel is the usual shape.
pub trait SignalingEvents: Send + Sync {
    fn on_open(&self) {}

    fn on_join(&self, _join: &JoinPayload) {}

    fn on_state(&self, _state: &StatePayload) {}

    fn on_offer(&self, _offer: &SessionDescription, _from: Option<&PeerId>) {}

    fn on_answer(&self, _answer: &SessionDescription, _from: Option<&PeerId>) {}

    fn on_ice_candidate(&self, _candidate: &IceCandidate, _from: Option<&PeerId>) {}

    fn on_leave(&self, _from: Option<&PeerId>) {}

    fn on_peer_disconnected(&self, _presence: &PresencePayload) {}

    fn on_peer_reconnected(&self, _presence: &PresencePayload) {}

    fn on_renegotiate_request(&self, _from: Option<&PeerId>) {}

    /// Envelopes whose type this build does not know.
    fn on_message(&self, _envelope: &Envelope) {}

    fn on_reconnecting(&self, _attempt: u32, _delay: Duration) {}

    fn on_reconnected(&self) {}

    fn on_close(&self) {}

    fn on_error(&self, _error: &SignalingError) {}
}

/// Decoded form of an inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalEvent {
    Join(JoinPayload),
    State(StatePayload),
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
    Leave,
    PeerDisconnected(PresencePayload),
    PeerReconnected(PresencePayload),
    RenegotiateRequest,
    Unknown(Envelope),
}

impl SignalEvent {
    pub fn decode(envelope: &Envelope) -> Result<Self, tandem_core::ProtocolError> {
        let Some(kind) = MessageType::parse(&envelope.kind) else {
            return Ok(SignalEvent::Unknown(envelope.clone()));
        };

        Ok(match kind {
            MessageType::Join => SignalEvent::Join(envelope.decode()?),
            MessageType::State => SignalEvent::State(envelope.decode()?),
            MessageType::Offer => SignalEvent::Offer(envelope.decode()?),
            MessageType::Answer => SignalEvent::Answer(envelope.decode()?),
            MessageType::IceCandidate => SignalEvent::IceCandidate(envelope.decode()?),
            MessageType::Leave => SignalEvent::Leave,
            MessageType::PeerDisconnected => SignalEvent::PeerDisconnected(envelope.decode()?),
            MessageType::PeerReconnected => SignalEvent::PeerReconnected(envelope.decode()?),
            MessageType::RenegotiateRequest => SignalEvent::RenegotiateRequest,
        })
    }
}

/// Routes one inbound envelope to the matching handler method. Envelopes with a
/// known type but an unreadable payload are logged and dropped.
pub fn dispatch(handler: &dyn SignalingEvents, envelope: &Envelope) {
    let event = match SignalEvent::decode(envelope) {
        Ok(event) => event,
        Err(e) => {
            warn!("Dropping {} envelope: {}", envelope.kind, e);
            return;
        }
    };
    let from = envelope.from.as_ref();

    match &event {
        SignalEvent::Join(join) => handler.on_join(join),
        SignalEvent::State(state) => handler.on_state(state),
        SignalEvent::Offer(sdp) => handler.on_offer(sdp, from),
        SignalEvent::Answer(sdp) => handler.on_answer(sdp, from),
        SignalEvent::IceCandidate(candidate) => handler.on_ice_candidate(candidate, from),
        SignalEvent::Leave => handler.on_leave(from),
        SignalEvent::PeerDisconnected(p) => handler.on_peer_disconnected(p),
        SignalEvent::PeerReconnected(p) => handler.on_peer_reconnected(p),
        SignalEvent::RenegotiateRequest => handler.on_renegotiate_request(from),
        SignalEvent::Unknown(envelope) => handler.on_message(envelope),
    }
}
