use crate::error::SessionError;
use crate::media::RemoteTrack;
use crate::peer::PeerConnectionState;

/// Where the recovery logic currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectionState {
    Idle,
    /// ICE reported `disconnected`; waiting out the grace period.
    WaitingForIce,
    /// A replacement peer connection is being negotiated.
    Recreating,
    /// Rebuild could not start; a retry is scheduled.
    RetryScheduled,
    /// The other participant's signaling socket is gone.
    PeerDisconnected,
    /// The other participant is back; the guest waits for the host's offer.
    AwaitingOffer,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeerSessionStatus {
    pub connection: PeerConnectionState,
    pub reconnection: ReconnectionState,
    pub terminal: Option<SessionError>,
    pub offer_sent: bool,
    /// Generation of the current peer connection.
    pub epoch: u64,
    pub peers_created: u64,
    pub recreate_attempts: u32,
    pub relay_only: bool,
    pub pending_timers: usize,
    pub destroyed: bool,
}

impl Default for PeerSessionStatus {
    fn default() -> Self {
        Self {
            connection: PeerConnectionState::New,
            reconnection: ReconnectionState::Idle,
            terminal: None,
            offer_sent: false,
            epoch: 0,
            peers_created: 0,
            recreate_attempts: 0,
            relay_only: false,
            pending_timers: 0,
            destroyed: false,
        }
    }
}

/// Push notifications from a peer session manager.
pub trait PeerSessionObserver: Send + Sync {
    fn on_status(&self, _status: &PeerSessionStatus) {}

    fn on_remote_track(&self, _track: &RemoteTrack) {}

    /// Called once, when the session hits an unrecoverable condition.
    fn on_terminal(&self, _error: &SessionError) {}
}
