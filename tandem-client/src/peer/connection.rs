use crate::error::PeerError;
use crate::media::{LocalStream, RemoteTrack};
use async_trait::async_trait;
use std::sync::Arc;
use tandem_core::{IceCandidate, IceServerConfig, SessionDescription};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

#[derive(Debug, Clone)]
pub enum PeerEvent {
    StateChanged(PeerConnectionState),
    LocalCandidate(IceCandidate),
    RemoteTrack(RemoteTrack),
}

/// A peer event tagged with the generation of the connection that raised it.
#[derive(Debug, Clone)]
pub struct TaggedPeerEvent {
    pub epoch: u64,
    pub event: PeerEvent,
}

/// Where a peer connection reports its events. Each rebuilt connection gets a
/// sink with a new epoch so late events from a closed one can be told apart.
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<TaggedPeerEvent>,
}

impl PeerEventSink {
    pub fn new(epoch: u64, tx: mpsc::UnboundedSender<TaggedPeerEvent>) -> Self {
        Self { epoch, tx }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn emit(&self, event: PeerEvent) {
        let _ = self.tx.send(TaggedPeerEvent {
            epoch: self.epoch,
            event,
        });
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerConfig {
    pub ice_servers: Vec<IceServerConfig>,
    /// Only gather relay candidates.
    pub relay_only: bool,
}

/// One peer connection as the session manager drives it.
#[async_trait]
pub trait MediaPeer: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, PeerError>;

    async fn create_answer(&self) -> Result<SessionDescription, PeerError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError>;

    async fn has_remote_description(&self) -> bool;

    fn negotiation_state(&self) -> NegotiationState;

    /// Stop reporting events. Called before `close` so a dying connection
    /// cannot feed the recovery logic.
    fn detach(&self);

    async fn close(&self) -> Result<(), PeerError>;
}

#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn create(
        &self,
        config: &PeerConfig,
        local: &LocalStream,
        sink: PeerEventSink,
    ) -> Result<Arc<dyn MediaPeer>, PeerError>;
}
