use crate::config::{ClientConfig, default_ice_servers};
use crate::error::{SessionError, SignalingError};
use crate::media::{LocalStream, MediaSource, RemoteStream, RemoteTrack};
use crate::peer::{
    PeerConnectionState, PeerConnector, PeerSessionDeps, PeerSessionManager, PeerSessionObserver,
    PeerSessionStatus, ReconnectionState,
};
use crate::session::{CallState, EndReason};
use crate::signaling::{SignalingClient, SignalingEvents, SignalingHub, SignalingOutput, Subscription};
use crate::turn_cache::TurnConfigCache;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tandem_core::{
    CallId, CallStatus, CreateCallResponse, JoinCallResponse, JoinPayload, PeerId,
    PresencePayload, Role, StatePayload,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Who this side is in which call, as returned by create/join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub call_id: CallId,
    pub peer_id: PeerId,
    pub role: Role,
}

impl CallContext {
    pub fn host(created: &CreateCallResponse) -> Self {
        Self {
            call_id: created.call_id.clone(),
            peer_id: created.host_peer_id.clone(),
            role: Role::Host,
        }
    }

    pub fn joined(call_id: &CallId, joined: &JoinCallResponse) -> Self {
        Self {
            call_id: call_id.clone(),
            peer_id: joined.peer_id.clone(),
            role: joined.role,
        }
    }
}

pub struct SessionDeps {
    pub media: Arc<dyn MediaSource>,
    pub connector: Arc<dyn PeerConnector>,
    pub hub: SignalingHub,
    pub turn: Option<Arc<TurnConfigCache>>,
}

enum DriverEvent {
    SignalingOpen,
    SignalingLost,
    SignalingClosed,
    SignalingRejected,
    State(StatePayload),
    RemoteLeft,
    PeerAway(bool),
    PeerStatus(PeerSessionStatus),
    RemoteTrack(RemoteTrack),
    Terminal(SessionError),
}

/// Listens on both signaling and the peer session and feeds the driver task.
struct DriverHandler {
    events: mpsc::UnboundedSender<DriverEvent>,
}

impl DriverHandler {
    fn push(&self, event: DriverEvent) {
        let _ = self.events.send(event);
    }
}

impl SignalingEvents for DriverHandler {
    fn on_open(&self) {
        self.push(DriverEvent::SignalingOpen);
    }

    fn on_join(&self, join: &JoinPayload) {
        debug!(
            "Joined as {} (reconnect: {}, peer online: {})",
            join.role, join.is_reconnect, join.peer_online
        );
    }

    fn on_state(&self, state: &StatePayload) {
        self.push(DriverEvent::State(*state));
    }

    fn on_leave(&self, _from: Option<&PeerId>) {
        self.push(DriverEvent::RemoteLeft);
    }

    fn on_peer_disconnected(&self, _presence: &PresencePayload) {
        self.push(DriverEvent::PeerAway(true));
    }

    fn on_peer_reconnected(&self, _presence: &PresencePayload) {
        self.push(DriverEvent::PeerAway(false));
    }

    fn on_reconnecting(&self, attempt: u32, delay: Duration) {
        debug!("Signaling reconnect attempt {} in {:?}", attempt, delay);
        self.push(DriverEvent::SignalingLost);
    }

    fn on_reconnected(&self) {
        self.push(DriverEvent::SignalingOpen);
    }

    fn on_close(&self) {
        self.push(DriverEvent::SignalingClosed);
    }

    fn on_error(&self, error: &SignalingError) {
        if let SignalingError::Rejected(status) = error {
            warn!("Signaling refused with status {}", status);
            self.push(DriverEvent::SignalingRejected);
        }
    }
}

impl PeerSessionObserver for DriverHandler {
    fn on_status(&self, status: &PeerSessionStatus) {
        self.push(DriverEvent::PeerStatus(status.clone()));
    }

    fn on_remote_track(&self, track: &RemoteTrack) {
        self.push(DriverEvent::RemoteTrack(track.clone()));
    }

    fn on_terminal(&self, error: &SessionError) {
        self.push(DriverEvent::Terminal(error.clone()));
    }
}

struct SessionInner {
    context: CallContext,
    signaling: SignalingClient,
    manager: PeerSessionManager,
    local: OnceLock<LocalStream>,
    state: watch::Sender<CallState>,
    remote: watch::Sender<RemoteStream>,
    subscriptions: Mutex<Vec<Subscription>>,
    ended: AtomicBool,
}

impl SessionInner {
    fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    fn set_state(&self, next: CallState) {
        if self.is_ended() {
            return;
        }
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            info!("Call {} is now {:?}", self.context.call_id, next);
            *current = next;
            true
        });
    }

    /// The only way a session ends. Runs once whatever the cause.
    async fn teardown(&self, reason: EndReason) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Ending call {}: {}", self.context.call_id, reason);

        if reason.announces_leave()
            && let Err(e) = self.signaling.send_leave()
        {
            debug!("Leave not sent: {}", e);
        }
        self.manager.destroy().await;

        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        self.signaling.close();
        self.state.send_replace(CallState::finished(reason));
    }
}

/// One participant's view of one call: a signaling subscription and a peer
/// session, torn down together.
pub struct CallSession {
    inner: Arc<SessionInner>,
    driver: JoinHandle<()>,
}

impl CallSession {
    /// Acquires media, opens signaling and starts negotiating. The host sends
    /// its offer as soon as the guest is present.
    pub async fn start(
        config: &ClientConfig,
        context: CallContext,
        deps: SessionDeps,
    ) -> Result<Self, SessionError> {
        let signaling = deps
            .hub
            .client(&context.call_id, &context.peer_id)
            .map_err(|e| SessionError::SignalingUnavailable(e.to_string()))?;

        let (events, events_rx) = mpsc::unbounded_channel();
        let handler = Arc::new(DriverHandler { events });
        let manager = PeerSessionManager::spawn(
            config,
            PeerSessionDeps {
                role: context.role,
                connector: deps.connector,
                signaling: Arc::new(signaling.clone()),
                turn: deps.turn.clone(),
                observer: Some(handler.clone()),
            },
        );

        let inner = Arc::new(SessionInner {
            context,
            signaling,
            manager,
            local: OnceLock::new(),
            state: watch::channel(CallState::Connecting).0,
            remote: watch::channel(RemoteStream::default()).0,
            subscriptions: Mutex::new(Vec::new()),
            ended: AtomicBool::new(false),
        });

        // Subscribed before anything can arrive on the socket; the manager
        // goes first so it has seen `open` before the driver asks for an offer.
        {
            let manager_sub = inner.signaling.subscribe(inner.manager.signal_handler());
            let driver_sub = inner.signaling.subscribe(handler);
            let mut subscriptions = inner
                .subscriptions
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            subscriptions.push(manager_sub);
            subscriptions.push(driver_sub);
        }

        let local = match deps.media.acquire().await {
            Ok(local) => local,
            Err(e) => {
                inner.teardown(EndReason::MediaUnavailable).await;
                return Err(SessionError::MediaAcquisition(e.0));
            }
        };
        let _ = inner.local.set(local.clone());

        let ice_servers = match &deps.turn {
            Some(turn) => turn.get(false).await,
            None => default_ice_servers(),
        };
        if let Err(e) = inner.manager.initialize(local, ice_servers).await {
            inner.teardown(EndReason::NegotiationFailed).await;
            return Err(e);
        }

        // Events queued so far are handled once the peer connection exists.
        let driver = tokio::spawn(drive(inner.clone(), events_rx));
        Ok(Self { inner, driver })
    }

    pub fn context(&self) -> &CallContext {
        &self.inner.context
    }

    pub fn state(&self) -> CallState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<CallState> {
        self.inner.state.subscribe()
    }

    pub fn local_stream(&self) -> Option<LocalStream> {
        self.inner.local.get().cloned()
    }

    pub fn remote_stream(&self) -> RemoteStream {
        self.inner.remote.borrow().clone()
    }

    pub fn watch_remote_stream(&self) -> watch::Receiver<RemoteStream> {
        self.inner.remote.subscribe()
    }

    pub fn peer_status(&self) -> PeerSessionStatus {
        self.inner.manager.status()
    }

    /// Leaves the call. Calling it again does nothing.
    pub async fn hangup(&self) {
        self.inner.teardown(EndReason::LocalHangup).await;
        self.driver.abort();
    }

    /// Forces a peer connection rebuild. Returns `false` once the call is over.
    pub fn retry(&self) -> bool {
        if self.inner.is_ended() {
            return false;
        }
        self.inner.manager.retry();
        true
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[derive(Default)]
struct Progress {
    participants: u8,
    ready: bool,
    signaling_lost: bool,
    peer_away: bool,
    was_connected: bool,
    offer_requested: bool,
    peer: PeerSessionStatus,
}

impl Progress {
    fn call_state(&self) -> CallState {
        if self.peer_away {
            return CallState::PeerDisconnected;
        }
        if self.peer.connection == PeerConnectionState::Connected {
            return CallState::Connected;
        }
        let recovering = !matches!(self.peer.reconnection, ReconnectionState::Idle);
        if self.signaling_lost || (self.was_connected && recovering) {
            return CallState::Reconnecting;
        }
        if self.participants < 2 {
            return CallState::WaitingForPeer;
        }
        CallState::Connecting
    }
}

async fn drive(inner: Arc<SessionInner>, mut events: mpsc::UnboundedReceiver<DriverEvent>) {
    let role = inner.context.role;
    let mut progress = Progress::default();
    let mut rejected = false;
    let mut epoch = 0;

    while let Some(event) = events.recv().await {
        if inner.is_ended() {
            break;
        }

        let ending = match event {
            DriverEvent::SignalingOpen => {
                progress.ready = true;
                progress.signaling_lost = false;
                None
            }
            DriverEvent::SignalingLost => {
                progress.ready = false;
                progress.signaling_lost = true;
                None
            }
            DriverEvent::SignalingRejected => {
                rejected = true;
                None
            }
            DriverEvent::SignalingClosed => Some(if rejected {
                EndReason::SignalingRejected
            } else {
                EndReason::SignalingClosed
            }),
            DriverEvent::State(state) => {
                progress.participants = state.participants.count;
                (state.status == CallStatus::Ended).then_some(EndReason::CallEnded)
            }
            DriverEvent::RemoteLeft => Some(EndReason::RemoteHangup),
            DriverEvent::PeerAway(away) => {
                progress.peer_away = away;
                None
            }
            DriverEvent::PeerStatus(status) => {
                if status.connection == PeerConnectionState::Connected {
                    progress.was_connected = true;
                }
                if status.epoch != epoch {
                    epoch = status.epoch;
                    inner.remote.send_replace(RemoteStream::default());
                }
                progress.peer = status;
                None
            }
            DriverEvent::RemoteTrack(track) => {
                inner.remote.send_modify(|stream| stream.tracks.push(track));
                None
            }
            DriverEvent::Terminal(error) => match error {
                SessionError::PresenceTimeout => Some(EndReason::PresenceTimeout),
                SessionError::RecreationExhausted(_) => Some(EndReason::RecreationExhausted),
                other => {
                    debug!("Peer session error: {}", other);
                    None
                }
            },
        };

        if let Some(reason) = ending {
            inner.teardown(reason).await;
            break;
        }

        if role == Role::Host
            && progress.participants >= 2
            && progress.ready
            && !progress.offer_requested
            && !progress.peer.offer_sent
        {
            progress.offer_requested = inner.manager.initiate_call().await;
        }

        inner.set_state(progress.call_state());
    }
}
