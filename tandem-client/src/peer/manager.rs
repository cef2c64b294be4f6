use crate::config::ClientConfig;
use crate::error::SessionError;
use crate::media::LocalStream;
use crate::peer::{
    CandidateBuffer, MediaPeer, NegotiationState, PeerConfig, PeerConnectionState, PeerConnector,
    PeerEvent, PeerEventSink, PeerSessionObserver, PeerSessionStatus, ReconnectionState,
    TaggedPeerEvent, TimerFired, TimerKind, Timers,
};
use crate::signaling::{SignalEvent, SignalingOutput};
use crate::turn_cache::TurnConfigCache;
use std::sync::Arc;
use tandem_core::{IceCandidate, IceServerConfig, JoinPayload, Role, SessionDescription};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

pub(crate) enum ManagerCommand {
    Initialize {
        local: LocalStream,
        ice_servers: Vec<IceServerConfig>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    InitiateCall {
        reply: oneshot::Sender<bool>,
    },
    Signal(SignalEvent),
    SignalingOpen,
    Retry,
    Destroy {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NegotiationPhase {
    Idle,
    OfferPending,
    Negotiated,
}

/// A pending request to rebuild the peer connection.
#[derive(Debug, Clone, Copy, Default)]
struct Rebuild {
    refresh_turn: bool,
    notify: bool,
}

impl Rebuild {
    fn merge(self, other: Rebuild) -> Rebuild {
        Rebuild {
            refresh_turn: self.refresh_turn || other.refresh_turn,
            notify: self.notify || other.notify,
        }
    }
}

pub(crate) struct ManagerParts {
    pub role: Role,
    pub config: ClientConfig,
    pub connector: Arc<dyn PeerConnector>,
    pub signaling: Arc<dyn SignalingOutput>,
    pub turn: Option<Arc<TurnConfigCache>>,
    pub observer: Option<Arc<dyn PeerSessionObserver>>,
    pub status_tx: watch::Sender<PeerSessionStatus>,
    pub commands: mpsc::UnboundedReceiver<ManagerCommand>,
    pub shutdown: watch::Receiver<bool>,
}

/// Owns the peer connection of one participant and runs the recovery ladder.
///
/// Every input (commands, signaling, peer callbacks, timers) is handled on this
/// task, one at a time. Rebuilds requested while handling an input are queued
/// in `deferred` and run once that input is done.
pub(crate) struct PeerSessionActor {
    role: Role,
    config: ClientConfig,
    connector: Arc<dyn PeerConnector>,
    signaling: Arc<dyn SignalingOutput>,
    turn: Option<Arc<TurnConfigCache>>,
    observer: Option<Arc<dyn PeerSessionObserver>>,
    status_tx: watch::Sender<PeerSessionStatus>,

    commands: mpsc::UnboundedReceiver<ManagerCommand>,
    /// Flips to `true` as soon as destroy is requested, ahead of the command.
    shutdown: watch::Receiver<bool>,
    peer_tx: mpsc::UnboundedSender<TaggedPeerEvent>,
    peer_rx: mpsc::UnboundedReceiver<TaggedPeerEvent>,
    timer_rx: mpsc::UnboundedReceiver<TimerFired>,
    timers: Timers,

    peer: Option<Arc<dyn MediaPeer>>,
    local: Option<LocalStream>,
    ice_servers: Vec<IceServerConfig>,
    epoch: u64,
    peers_created: u64,

    phase: NegotiationPhase,
    offer_sent: bool,
    /// An offer that arrived before the first peer connection existed.
    early_offer: Option<SessionDescription>,
    candidates: CandidateBuffer,
    connection: PeerConnectionState,
    reconnection: ReconnectionState,

    /// Set while a rebuild is underway; further rebuild requests are coalesced.
    recreating: bool,
    attempts: u32,
    force_relay: bool,
    retry_with: Option<Rebuild>,
    deferred: Option<Rebuild>,

    terminal: Option<SessionError>,
    destroyed: bool,
}

impl PeerSessionActor {
    pub(crate) fn new(parts: ManagerParts) -> Self {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();

        Self {
            role: parts.role,
            config: parts.config,
            connector: parts.connector,
            signaling: parts.signaling,
            turn: parts.turn,
            observer: parts.observer,
            status_tx: parts.status_tx,
            commands: parts.commands,
            shutdown: parts.shutdown,
            peer_tx,
            peer_rx,
            timer_rx,
            timers: Timers::new(timer_tx),
            peer: None,
            local: None,
            ice_servers: Vec::new(),
            epoch: 0,
            peers_created: 0,
            phase: NegotiationPhase::Idle,
            offer_sent: false,
            early_offer: None,
            candidates: CandidateBuffer::default(),
            connection: PeerConnectionState::New,
            reconnection: ReconnectionState::Idle,
            recreating: false,
            attempts: 0,
            force_relay: false,
            retry_with: None,
            deferred: None,
            terminal: None,
            destroyed: false,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command).await {
                            break;
                        }
                    }
                    None => break,
                },
                Some(tagged) = self.peer_rx.recv() => self.handle_peer_event(tagged).await,
                Some(fired) = self.timer_rx.recv() => self.handle_timer(fired).await,
            }

            while let Some(rebuild) = self.deferred.take() {
                self.request_rebuild(rebuild).await;
            }
            self.publish();
        }

        self.teardown().await;
        self.publish();
        debug!("Peer session for {} stopped", self.role);
    }

    /// Returns `false` once the actor should stop.
    async fn handle_command(&mut self, command: ManagerCommand) -> bool {
        match command {
            ManagerCommand::Initialize {
                local,
                ice_servers,
                reply,
            } => {
                let _ = reply.send(self.initialize(local, ice_servers).await);
            }
            ManagerCommand::InitiateCall { reply } => {
                let _ = reply.send(self.initiate_call().await);
            }
            ManagerCommand::Signal(event) => self.handle_signal(event).await,
            ManagerCommand::SignalingOpen => self.signaling_open(),
            ManagerCommand::Retry => self.manual_retry(),
            ManagerCommand::Destroy { reply } => {
                self.teardown().await;
                self.publish();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn is_active(&self) -> bool {
        !self.destroyed && self.terminal.is_none()
    }

    async fn initialize(
        &mut self,
        local: LocalStream,
        ice_servers: Vec<IceServerConfig>,
    ) -> Result<(), SessionError> {
        if !self.is_active() {
            return Err(SessionError::Closed);
        }
        if self.peer.is_some() {
            debug!("Peer session already initialized");
            return Ok(());
        }

        self.local = Some(local);
        self.ice_servers = ice_servers;
        self.build_peer()
            .await
            .map_err(|e| SessionError::Negotiation(e.to_string()))?;

        if let Some(offer) = self.early_offer.take() {
            self.handle_offer(offer).await;
        }
        Ok(())
    }

    async fn initiate_call(&mut self) -> bool {
        if self.role != Role::Host || self.offer_sent || !self.is_active() {
            return false;
        }

        match self.send_offer().await {
            Ok(sent) => {
                self.offer_sent |= sent;
                sent
            }
            Err(e) => {
                self.negotiation_failed(e);
                false
            }
        }
    }

    /// Creates and sends an offer on the current peer. `Ok(false)` when there is
    /// nothing to do yet.
    async fn send_offer(&mut self) -> Result<bool, SessionError> {
        if self.role != Role::Host || self.phase != NegotiationPhase::Idle {
            return Ok(false);
        }
        let Some(peer) = self.peer.clone() else {
            return Ok(false);
        };
        if !self.signaling.is_ready() {
            debug!("Signaling not ready; holding offer");
            return Ok(false);
        }

        let offer = peer.create_offer().await.map_err(negotiation)?;
        peer.set_local_description(offer.clone())
            .await
            .map_err(negotiation)?;
        self.signaling
            .send_offer(&offer)
            .map_err(|e| SessionError::SignalingUnavailable(e.to_string()))?;

        self.phase = NegotiationPhase::OfferPending;
        info!("Sent offer (epoch {})", self.epoch);
        Ok(true)
    }

    async fn handle_signal(&mut self, event: SignalEvent) {
        if !self.is_active() {
            return;
        }

        match event {
            SignalEvent::Offer(offer) => self.handle_offer(offer).await,
            SignalEvent::Answer(answer) => self.handle_answer(answer).await,
            SignalEvent::IceCandidate(candidate) => self.handle_candidate(candidate).await,
            SignalEvent::Join(join) => self.handle_own_join(&join),
            SignalEvent::PeerDisconnected(presence) => {
                info!("{} left signaling; waiting for it to return", presence.peer_id);
                self.reconnection = ReconnectionState::PeerDisconnected;
                if !self.timers.is_armed(TimerKind::PresenceGrace) {
                    self.timers
                        .arm(TimerKind::PresenceGrace, self.config.presence_grace);
                }
            }
            SignalEvent::PeerReconnected(presence) => {
                info!("{} is back", presence.peer_id);
                self.timers.cancel(TimerKind::PresenceGrace);
                if self.connection == PeerConnectionState::Connected {
                    self.reconnection = ReconnectionState::Idle;
                } else if self.role == Role::Host {
                    self.defer(Rebuild {
                        refresh_turn: false,
                        notify: true,
                    });
                } else {
                    self.reconnection = ReconnectionState::AwaitingOffer;
                }
            }
            SignalEvent::RenegotiateRequest => {
                debug!("Remote side asked for renegotiation");
                self.defer(Rebuild {
                    refresh_turn: false,
                    notify: false,
                });
            }
            SignalEvent::State(_) | SignalEvent::Leave | SignalEvent::Unknown(_) => {}
        }
    }

    fn handle_own_join(&mut self, join: &JoinPayload) {
        if !join.is_reconnect || self.connection == PeerConnectionState::Connected {
            return;
        }

        match self.role {
            Role::Host if join.peer_online => self.defer(Rebuild {
                refresh_turn: false,
                notify: true,
            }),
            Role::Host => {}
            Role::Guest => self.reconnection = ReconnectionState::AwaitingOffer,
        }
    }

    async fn handle_offer(&mut self, offer: SessionDescription) {
        if self.role == Role::Host {
            warn!("Ignoring offer: {}", SessionError::StaleOffer);
            return;
        }
        let Some(mut peer) = self.peer.clone() else {
            debug!("Holding offer until a peer connection exists");
            self.early_offer = Some(offer);
            return;
        };

        // A fresh offer on a negotiated connection means the host rebuilt its side.
        if peer.has_remote_description().await {
            debug!("Replacing negotiated peer for a new offer");
            self.close_peer().await;
            if let Err(e) = self.build_peer().await {
                self.negotiation_failed(SessionError::Negotiation(e.to_string()));
                return;
            }
            match self.peer.clone() {
                Some(fresh) => peer = fresh,
                None => return,
            }
        }

        match self.answer(&peer, offer).await {
            Ok(()) => {
                self.phase = NegotiationPhase::Negotiated;
                if self.reconnection == ReconnectionState::AwaitingOffer {
                    self.reconnection = ReconnectionState::Recreating;
                }
            }
            Err(e) => self.negotiation_failed(e),
        }
    }

    async fn answer(
        &mut self,
        peer: &Arc<dyn MediaPeer>,
        offer: SessionDescription,
    ) -> Result<(), SessionError> {
        peer.set_remote_description(offer)
            .await
            .map_err(negotiation)?;
        let answer = peer.create_answer().await.map_err(negotiation)?;
        peer.set_local_description(answer.clone())
            .await
            .map_err(negotiation)?;
        self.flush_candidates(peer).await;
        self.signaling
            .send_answer(&answer)
            .map_err(|e| SessionError::SignalingUnavailable(e.to_string()))?;
        info!("Sent answer (epoch {})", self.epoch);
        Ok(())
    }

    async fn handle_answer(&mut self, answer: SessionDescription) {
        let Some(peer) = self.peer.clone() else {
            return;
        };
        if self.phase != NegotiationPhase::OfferPending
            || peer.negotiation_state() != NegotiationState::HaveLocalOffer
        {
            warn!("Ignoring answer: {}", SessionError::StaleAnswer);
            return;
        }

        match peer.set_remote_description(answer).await {
            Ok(()) => {
                self.phase = NegotiationPhase::Negotiated;
                self.flush_candidates(&peer).await;
            }
            Err(e) => self.negotiation_failed(negotiation(e)),
        }
    }

    async fn handle_candidate(&mut self, candidate: IceCandidate) {
        let peer = match self.peer.clone() {
            Some(peer) if peer.has_remote_description().await => peer,
            _ => {
                self.candidates.push(candidate);
                return;
            }
        };

        if let Err(e) = peer.add_ice_candidate(candidate).await {
            warn!("Failed to add remote candidate: {}", e);
        }
    }

    async fn flush_candidates(&mut self, peer: &Arc<dyn MediaPeer>) {
        if self.candidates.is_empty() {
            return;
        }
        debug!("Applying {} buffered candidates", self.candidates.len());
        let pending: Vec<IceCandidate> = self.candidates.drain().collect();
        for candidate in pending {
            if let Err(e) = peer.add_ice_candidate(candidate).await {
                warn!("Failed to add buffered candidate: {}", e);
            }
        }
    }

    async fn handle_peer_event(&mut self, tagged: TaggedPeerEvent) {
        if tagged.epoch != self.epoch || !self.is_active() {
            debug!("Dropping event from peer epoch {}", tagged.epoch);
            return;
        }

        match tagged.event {
            PeerEvent::LocalCandidate(candidate) => {
                if let Err(e) = self.signaling.send_ice(&candidate) {
                    debug!("Local candidate not sent: {}", e);
                }
            }
            PeerEvent::RemoteTrack(track) => {
                if let Some(observer) = &self.observer {
                    observer.on_remote_track(&track);
                }
            }
            PeerEvent::StateChanged(state) => self.connection_state_changed(state),
        }
    }

    fn connection_state_changed(&mut self, state: PeerConnectionState) {
        debug!("Peer connection (epoch {}) is {:?}", self.epoch, state);
        self.connection = state;

        match state {
            PeerConnectionState::Connected => {
                self.timers.cancel(TimerKind::IceGrace);
                self.timers.cancel(TimerKind::RecreateRetry);
                self.timers.cancel(TimerKind::RelayFallback);
                if self.attempts > 0 {
                    info!("Peer connection recovered after {} rebuilds", self.attempts);
                }
                self.attempts = 0;
                self.recreating = false;
                self.retry_with = None;
                if self.reconnection != ReconnectionState::PeerDisconnected {
                    self.reconnection = ReconnectionState::Idle;
                }
            }
            PeerConnectionState::Disconnected => {
                if !self.timers.is_armed(TimerKind::IceGrace) {
                    self.timers
                        .arm(TimerKind::IceGrace, self.config.ice_disconnected_grace);
                }
                if self.reconnection == ReconnectionState::Idle {
                    self.reconnection = ReconnectionState::WaitingForIce;
                }
            }
            PeerConnectionState::Failed => {
                warn!("Peer connection failed; rebuilding");
                self.timers.cancel(TimerKind::IceGrace);
                self.recreating = false;
                self.defer(Rebuild {
                    refresh_turn: true,
                    notify: true,
                });
            }
            PeerConnectionState::New
            | PeerConnectionState::Connecting
            | PeerConnectionState::Closed => {}
        }
    }

    async fn handle_timer(&mut self, fired: TimerFired) {
        if !self.timers.take_fired(fired) || !self.is_active() {
            return;
        }

        match fired.kind {
            TimerKind::IceGrace => {
                if self.connection == PeerConnectionState::Disconnected {
                    info!("ICE still disconnected after grace period; rebuilding");
                    self.recreating = false;
                    self.defer(Rebuild {
                        refresh_turn: false,
                        notify: true,
                    });
                } else if self.reconnection == ReconnectionState::WaitingForIce {
                    self.reconnection = ReconnectionState::Idle;
                }
            }
            TimerKind::RecreateRetry => {
                self.recreating = false;
                let rebuild = self.retry_with.take().unwrap_or_default();
                self.defer(rebuild);
            }
            TimerKind::RelayFallback => {
                if self.connection != PeerConnectionState::Connected {
                    warn!("Rebuilt peer did not connect in time; forcing relay-only transport");
                    self.force_relay = true;
                    self.recreating = false;
                    self.defer(Rebuild {
                        refresh_turn: true,
                        notify: true,
                    });
                }
            }
            TimerKind::PresenceGrace => {
                warn!("Remote participant did not return in time");
                self.fail(SessionError::PresenceTimeout).await;
            }
        }
    }

    fn signaling_open(&mut self) {
        if self.reconnection == ReconnectionState::RetryScheduled && self.is_active() {
            debug!("Signaling is back; running the scheduled rebuild now");
            self.timers.cancel(TimerKind::RecreateRetry);
            self.recreating = false;
            let rebuild = self.retry_with.take().unwrap_or_default();
            self.defer(rebuild);
        }
    }

    fn manual_retry(&mut self) {
        if !self.is_active() || self.local.is_none() {
            return;
        }
        info!("Manual retry requested");
        self.timers.cancel(TimerKind::RecreateRetry);
        self.recreating = false;
        self.defer(Rebuild {
            refresh_turn: true,
            notify: true,
        });
    }

    fn defer(&mut self, rebuild: Rebuild) {
        self.deferred = Some(match self.deferred.take() {
            Some(pending) => pending.merge(rebuild),
            None => rebuild,
        });
    }

    fn negotiation_failed(&mut self, error: SessionError) {
        warn!("Negotiation failed: {}", error);
        if self.recreating {
            self.schedule_retry(Rebuild {
                refresh_turn: false,
                notify: true,
            });
        } else {
            self.defer(Rebuild {
                refresh_turn: false,
                notify: true,
            });
        }
    }

    async fn request_rebuild(&mut self, rebuild: Rebuild) {
        if !self.is_active() || self.local.is_none() {
            return;
        }
        if self.recreating {
            debug!("Peer rebuild already in flight; coalescing");
            return;
        }
        self.recreating = true;
        self.rebuild_now(rebuild).await;
    }

    async fn rebuild_now(&mut self, rebuild: Rebuild) {
        if self.attempts >= self.config.max_recreate_attempts {
            self.fail(SessionError::RecreationExhausted(self.attempts))
                .await;
            return;
        }
        self.attempts += 1;
        self.reconnection = ReconnectionState::Recreating;
        self.timers.cancel(TimerKind::IceGrace);
        self.timers.cancel(TimerKind::RecreateRetry);
        self.timers.cancel(TimerKind::RelayFallback);

        if !self.signaling.is_ready() {
            info!(
                "Signaling not ready; retrying peer rebuild in {:?}",
                self.config.recreate_retry_delay
            );
            self.schedule_retry(rebuild);
            return;
        }

        info!(
            "Rebuilding peer connection (attempt {}, relay only: {})",
            self.attempts, self.force_relay
        );
        self.close_peer().await;
        if rebuild.refresh_turn
            && let Some(turn) = self.turn.clone()
        {
            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                servers = turn.get(true) => self.ice_servers = servers,
                _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => {
                    debug!("Session closing; abandoning relay credential refresh");
                    return;
                }
            }
        }
        if let Err(e) = self.build_peer().await {
            warn!("Could not build peer connection: {}", e);
            self.schedule_retry(rebuild);
            return;
        }

        if rebuild.notify
            && let Err(e) = self.signaling.send_renegotiate_request()
        {
            debug!("Renegotiate request not sent: {}", e);
        }

        match self.role {
            Role::Host => match self.send_offer().await {
                Ok(true) => {
                    self.offer_sent = true;
                    self.timers
                        .arm(TimerKind::RelayFallback, self.config.relay_fallback_timeout);
                }
                Ok(false) => self.schedule_retry(rebuild),
                Err(e) => {
                    warn!("Offer after rebuild failed: {}", e);
                    self.schedule_retry(rebuild);
                }
            },
            Role::Guest => self.reconnection = ReconnectionState::AwaitingOffer,
        }
    }

    fn schedule_retry(&mut self, rebuild: Rebuild) {
        self.retry_with = Some(match self.retry_with.take() {
            Some(pending) => pending.merge(rebuild),
            None => rebuild,
        });
        self.reconnection = ReconnectionState::RetryScheduled;
        self.timers
            .arm(TimerKind::RecreateRetry, self.config.recreate_retry_delay);
    }

    async fn build_peer(&mut self) -> Result<(), crate::error::PeerError> {
        let local = self.local.clone().unwrap_or_default();
        self.epoch += 1;
        let config = PeerConfig {
            ice_servers: self.ice_servers.clone(),
            relay_only: self.force_relay,
        };
        let sink = PeerEventSink::new(self.epoch, self.peer_tx.clone());

        let peer = self.connector.create(&config, &local, sink).await?;
        self.peers_created += 1;
        self.peer = Some(peer);
        self.connection = PeerConnectionState::New;
        self.phase = NegotiationPhase::Idle;
        Ok(())
    }

    /// Candidates still buffered belong to the closed connection and go with it.
    async fn close_peer(&mut self) {
        self.candidates.clear();
        if let Some(peer) = self.peer.take() {
            peer.detach();
            if let Err(e) = peer.close().await {
                debug!("Error closing peer connection: {}", e);
            }
        }
    }

    /// Ends the session once; later failures are ignored.
    async fn fail(&mut self, error: SessionError) {
        if !self.is_active() {
            return;
        }
        warn!("Peer session ended: {}", error);
        self.timers.cancel_all();
        self.close_peer().await;
        self.connection = PeerConnectionState::Closed;
        self.reconnection = ReconnectionState::Idle;
        self.recreating = false;
        self.deferred = None;
        self.terminal = Some(error.clone());
        self.publish();

        if let Some(observer) = &self.observer {
            observer.on_terminal(&error);
        }
    }

    async fn teardown(&mut self) {
        if self.destroyed {
            return;
        }
        self.timers.cancel_all();
        self.close_peer().await;
        self.candidates.clear();
        self.phase = NegotiationPhase::Idle;
        self.connection = PeerConnectionState::Closed;
        self.reconnection = ReconnectionState::Idle;
        self.recreating = false;
        self.retry_with = None;
        self.deferred = None;
        self.destroyed = true;
    }

    fn snapshot(&self) -> PeerSessionStatus {
        PeerSessionStatus {
            connection: self.connection,
            reconnection: self.reconnection,
            terminal: self.terminal.clone(),
            offer_sent: self.offer_sent,
            epoch: self.epoch,
            peers_created: self.peers_created,
            recreate_attempts: self.attempts,
            relay_only: self.force_relay,
            pending_timers: self.timers.pending(),
            destroyed: self.destroyed,
        }
    }

    fn publish(&self) {
        let status = self.snapshot();
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status.clone();
            true
        });

        if changed && let Some(observer) = &self.observer {
            observer.on_status(&status);
        }
    }
}

fn negotiation(error: crate::error::PeerError) -> SessionError {
    SessionError::Negotiation(error.to_string())
}
