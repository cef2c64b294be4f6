use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tandem_client::{
    LocalStream, MediaPeer, NegotiationState, PeerConfig, PeerConnectionState, PeerConnector,
    PeerError, PeerEvent, PeerEventSink,
};
use tandem_core::{IceCandidate, SdpType, SessionDescription};

/// Hands out `MockPeer`s and keeps every one it built.
#[derive(Default)]
pub struct MockConnector {
    peers: Mutex<Vec<Arc<MockPeer>>>,
    fail_creates: AtomicU32,
    auto_connect: bool,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Peers report `connected` as soon as offer and answer are both applied.
    pub fn auto_connecting() -> Arc<Self> {
        Arc::new(Self {
            auto_connect: true,
            ..Self::default()
        })
    }

    pub fn created(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn peer(&self, index: usize) -> Arc<MockPeer> {
        self.peers.lock().unwrap()[index].clone()
    }

    pub fn latest(&self) -> Arc<MockPeer> {
        self.peers
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no peer created yet")
    }

    pub fn fail_next_creates(&self, count: u32) {
        self.fail_creates.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl PeerConnector for MockConnector {
    async fn create(
        &self,
        config: &PeerConfig,
        _local: &LocalStream,
        sink: PeerEventSink,
    ) -> Result<Arc<dyn MediaPeer>, PeerError> {
        let remaining = self.fail_creates.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_creates.store(remaining - 1, Ordering::SeqCst);
            return Err(PeerError::Rejected("mock create failure".into()));
        }

        let peer = Arc::new(MockPeer {
            config: config.clone(),
            sink,
            auto_connect: self.auto_connect,
            fail_offer: AtomicBool::new(false),
            state: Mutex::new(PeerState::default()),
        });
        self.peers.lock().unwrap().push(peer.clone());
        Ok(peer)
    }
}

#[derive(Default)]
struct PeerState {
    negotiation: Option<NegotiationState>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    applied: Vec<String>,
    ops: Vec<String>,
    detached: bool,
    closed: bool,
}

/// In-memory stand-in for a peer connection that follows the offer/answer
/// state rules and logs every call made on it.
pub struct MockPeer {
    pub config: PeerConfig,
    sink: PeerEventSink,
    auto_connect: bool,
    fail_offer: AtomicBool,
    state: Mutex<PeerState>,
}

impl MockPeer {
    pub fn epoch(&self) -> u64 {
        self.sink.epoch()
    }

    /// Emits even after `detach`, like a callback already in flight.
    pub fn emit_state(&self, state: PeerConnectionState) {
        self.sink.emit(PeerEvent::StateChanged(state));
    }

    pub fn emit_candidate(&self, candidate: &str) {
        self.sink
            .emit(PeerEvent::LocalCandidate(IceCandidate::new(candidate)));
    }

    pub fn fail_offers(&self) {
        self.fail_offer.store(true, Ordering::SeqCst);
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.state.lock().unwrap().applied.clone()
    }

    pub fn ops(&self) -> Vec<String> {
        self.state.lock().unwrap().ops.clone()
    }

    pub fn is_detached(&self) -> bool {
        self.state.lock().unwrap().detached
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    fn record(&self, op: impl Into<String>) {
        self.state.lock().unwrap().ops.push(op.into());
    }

    fn maybe_connect(&self) {
        let ready = {
            let state = self.state.lock().unwrap();
            state.local.is_some()
                && state.remote.is_some()
                && state.negotiation == Some(NegotiationState::Stable)
        };
        if self.auto_connect && ready {
            self.emit_state(PeerConnectionState::Connecting);
            self.emit_state(PeerConnectionState::Connected);
        }
    }
}

fn kind(desc: &SessionDescription) -> &'static str {
    match desc.kind {
        SdpType::Offer => "offer",
        SdpType::Answer => "answer",
    }
}

#[async_trait]
impl MediaPeer for MockPeer {
    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        self.record("create_offer");
        if self.fail_offer.load(Ordering::SeqCst) {
            return Err(PeerError::Rejected("mock offer failure".into()));
        }
        Ok(SessionDescription::offer(format!("offer-{}", self.epoch())))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        self.record("create_answer");
        if self.negotiation_state() != NegotiationState::HaveRemoteOffer {
            return Err(PeerError::Rejected("no remote offer".into()));
        }
        Ok(SessionDescription::answer(format!("answer-{}", self.epoch())))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        self.record(format!("set_local:{}", kind(&desc)));
        {
            let mut state = self.state.lock().unwrap();
            let current = state.negotiation.unwrap_or(NegotiationState::Stable);
            state.negotiation = Some(match (desc.kind, current) {
                (SdpType::Offer, NegotiationState::Stable) => NegotiationState::HaveLocalOffer,
                (SdpType::Answer, NegotiationState::HaveRemoteOffer) => NegotiationState::Stable,
                _ => return Err(PeerError::Rejected("bad local description".into())),
            });
            state.local = Some(desc);
        }
        self.maybe_connect();
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        self.record(format!("set_remote:{}", kind(&desc)));
        {
            let mut state = self.state.lock().unwrap();
            let current = state.negotiation.unwrap_or(NegotiationState::Stable);
            state.negotiation = Some(match (desc.kind, current) {
                (SdpType::Offer, NegotiationState::Stable) => NegotiationState::HaveRemoteOffer,
                (SdpType::Answer, NegotiationState::HaveLocalOffer) => NegotiationState::Stable,
                _ => return Err(PeerError::Rejected("bad remote description".into())),
            });
            state.remote = Some(desc);
        }
        self.maybe_connect();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        let mut state = self.state.lock().unwrap();
        if state.remote.is_none() {
            return Err(PeerError::Rejected("no remote description".into()));
        }
        state.ops.push(format!("candidate:{}", candidate.candidate));
        state.applied.push(candidate.candidate);
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.state.lock().unwrap().remote.is_some()
    }

    fn negotiation_state(&self) -> NegotiationState {
        let state = self.state.lock().unwrap();
        if state.closed {
            return NegotiationState::Closed;
        }
        state.negotiation.unwrap_or(NegotiationState::Stable)
    }

    fn detach(&self) {
        self.state.lock().unwrap().detached = true;
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}
