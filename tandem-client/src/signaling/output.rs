use crate::error::SignalingError;
use tandem_core::{Envelope, IceCandidate, MessageType, SessionDescription};

/// Outbound half of signaling as seen by the peer session manager.
pub trait SignalingOutput: Send + Sync {
    /// `true` while a socket is open and outbound negotiation can be delivered.
    fn is_ready(&self) -> bool;

    fn send(&self, envelope: Envelope) -> Result<(), SignalingError>;

    fn send_offer(&self, offer: &SessionDescription) -> Result<(), SignalingError> {
        self.send(Envelope::new(MessageType::Offer, offer)?)
    }

    fn send_answer(&self, answer: &SessionDescription) -> Result<(), SignalingError> {
        self.send(Envelope::new(MessageType::Answer, answer)?)
    }

    fn send_ice(&self, candidate: &IceCandidate) -> Result<(), SignalingError> {
        self.send(Envelope::new(MessageType::IceCandidate, candidate)?)
    }

    fn send_renegotiate_request(&self) -> Result<(), SignalingError> {
        self.send(Envelope::bare(MessageType::RenegotiateRequest))
    }

    fn send_leave(&self) -> Result<(), SignalingError> {
        self.send(Envelope::bare(MessageType::Leave))
    }
}
