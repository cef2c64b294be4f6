use crate::config::ClientConfig;
use crate::error::SessionError;
use crate::media::LocalStream;
use crate::peer::manager::{ManagerCommand, ManagerParts, PeerSessionActor};
use crate::peer::{PeerConnector, PeerSessionObserver, PeerSessionStatus};
use crate::signaling::{SignalEvent, SignalingEvents, SignalingOutput};
use crate::turn_cache::TurnConfigCache;
use std::sync::Arc;
use tandem_core::{
    Envelope, IceCandidate, IceServerConfig, JoinPayload, PeerId, PresencePayload, ProtocolError,
    Role, SessionDescription,
};
use tokio::sync::{mpsc, oneshot, watch};

/// Collaborators of a peer session, fixed for its lifetime.
pub struct PeerSessionDeps {
    pub role: Role,
    pub connector: Arc<dyn PeerConnector>,
    pub signaling: Arc<dyn SignalingOutput>,
    /// Used to refresh relay credentials on rebuild. `None` keeps the initial list.
    pub turn: Option<Arc<TurnConfigCache>>,
    pub observer: Option<Arc<dyn PeerSessionObserver>>,
}

/// Handle to a running peer session. Clones drive the same session.
#[derive(Clone)]
pub struct PeerSessionManager {
    commands: mpsc::UnboundedSender<ManagerCommand>,
    status: watch::Receiver<PeerSessionStatus>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl PeerSessionManager {
    pub fn spawn(config: &ClientConfig, deps: PeerSessionDeps) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(PeerSessionStatus::default());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let actor = PeerSessionActor::new(ManagerParts {
            role: deps.role,
            config: config.clone(),
            connector: deps.connector,
            signaling: deps.signaling,
            turn: deps.turn,
            observer: deps.observer,
            status_tx,
            commands: commands_rx,
            shutdown: shutdown_rx,
        });
        tokio::spawn(actor.run());

        Self {
            commands,
            status,
            shutdown: Arc::new(shutdown),
        }
    }

    /// Builds the first peer connection with `local` attached.
    pub async fn initialize(
        &self,
        local: LocalStream,
        ice_servers: Vec<IceServerConfig>,
    ) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(ManagerCommand::Initialize {
                local,
                ice_servers,
                reply,
            })
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Sends the first offer. Returns `true` only for the call that sent it;
    /// guests and repeated calls get `false`.
    pub async fn initiate_call(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(ManagerCommand::InitiateCall { reply })
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub fn process_signal(&self, envelope: &Envelope) -> Result<(), ProtocolError> {
        let event = SignalEvent::decode(envelope)?;
        self.forward(ManagerCommand::Signal(event));
        Ok(())
    }

    /// Rebuilds the peer connection now, with fresh relay credentials.
    pub fn retry(&self) {
        self.forward(ManagerCommand::Retry);
    }

    /// Closes the peer connection and cancels every timer. Safe to call again.
    ///
    /// Work the session is blocked on, such as a relay credential refresh, is
    /// abandoned so that this returns promptly.
    pub async fn destroy(&self) {
        self.shutdown.send_replace(true);
        let (reply, rx) = oneshot::channel();
        if self.commands.send(ManagerCommand::Destroy { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Handler to subscribe on the signaling client so that the session sees
    /// negotiation and presence messages.
    pub fn signal_handler(&self) -> Arc<dyn SignalingEvents> {
        Arc::new(SignalBridge {
            commands: self.commands.clone(),
        })
    }

    pub fn status(&self) -> PeerSessionStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<PeerSessionStatus> {
        self.status.clone()
    }

    fn forward(&self, command: ManagerCommand) {
        let _ = self.commands.send(command);
    }
}

struct SignalBridge {
    commands: mpsc::UnboundedSender<ManagerCommand>,
}

impl SignalBridge {
    fn signal(&self, event: SignalEvent) {
        let _ = self.commands.send(ManagerCommand::Signal(event));
    }
}

impl SignalingEvents for SignalBridge {
    fn on_open(&self) {
        let _ = self.commands.send(ManagerCommand::SignalingOpen);
    }

    fn on_reconnected(&self) {
        let _ = self.commands.send(ManagerCommand::SignalingOpen);
    }

    fn on_join(&self, join: &JoinPayload) {
        self.signal(SignalEvent::Join(join.clone()));
    }

    fn on_offer(&self, offer: &SessionDescription, _from: Option<&PeerId>) {
        self.signal(SignalEvent::Offer(offer.clone()));
    }

    fn on_answer(&self, answer: &SessionDescription, _from: Option<&PeerId>) {
        self.signal(SignalEvent::Answer(answer.clone()));
    }

    fn on_ice_candidate(&self, candidate: &IceCandidate, _from: Option<&PeerId>) {
        self.signal(SignalEvent::IceCandidate(candidate.clone()));
    }

    fn on_peer_disconnected(&self, presence: &PresencePayload) {
        self.signal(SignalEvent::PeerDisconnected(presence.clone()));
    }

    fn on_peer_reconnected(&self, presence: &PresencePayload) {
        self.signal(SignalEvent::PeerReconnected(presence.clone()));
    }

    fn on_renegotiate_request(&self, _from: Option<&PeerId>) {
        self.signal(SignalEvent::RenegotiateRequest);
    }
}
