use crate::error::CallError;
use tandem_core::{CallId, CallSnapshot, CallStatus, ParticipantCount, PeerId, Role, StatePayload};
use tokio::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Clone)]
pub struct Participant {
    pub peer_id: PeerId,
    pub role: Role,
    pub joined_at: Instant,
    pub left_at: Option<Instant>,
    pub is_present: bool,
    pub disconnected_at: Option<Instant>,
    pub reconnect_count: u32,
    ever_connected: bool,
}

impl Participant {
    fn new(peer_id: PeerId, role: Role, now: Instant) -> Self {
        Self {
            peer_id,
            role,
            joined_at: now,
            left_at: None,
            is_present: false,
            disconnected_at: None,
            reconnect_count: 0,
            ever_connected: false,
        }
    }

    /// A participant that never opened a socket counts as absent since it was admitted.
    pub fn absent_since(&self) -> Option<Instant> {
        if self.is_present {
            None
        } else {
            Some(self.disconnected_at.unwrap_or(self.joined_at))
        }
    }

    pub fn absent_longer_than(&self, now: Instant, grace: Duration) -> bool {
        self.absent_since()
            .is_some_and(|since| now.saturating_duration_since(since) > grace)
    }
}

/// How a socket attach changed the presence of its participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    /// First socket this participant ever opened.
    FirstConnect,
    /// Came back after being marked disconnected.
    Reconnected,
    /// A new socket replaced one that was still considered live.
    Superseded,
}

impl PresenceChange {
    pub fn is_reconnect(self) -> bool {
        !matches!(self, PresenceChange::FirstConnect)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryReason {
    TtlExceeded,
    /// One side of an active call stayed away past the grace window.
    PeerAbsent,
    /// Nobody has been connected for the whole grace window.
    Abandoned,
}

/// State of a single two-party call. Pure bookkeeping, driven by the owning actor.
#[derive(Debug)]
pub struct CallRoom {
    id: CallId,
    status: CallStatus,
    created_at: Instant,
    updated_at: Instant,
    expires_at: Instant,
    grace_window: Duration,
    host: Participant,
    guest: Option<Participant>,
    guests_admitted: u32,
}

impl CallRoom {
    pub fn new(id: CallId, now: Instant, ttl: Duration, grace_window: Duration) -> Self {
        Self {
            id,
            status: CallStatus::Waiting,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
            grace_window,
            host: Participant::new(PeerId::host(), Role::Host, now),
            guest: None,
            guests_admitted: 0,
        }
    }

    pub fn id(&self) -> &CallId {
        &self.id
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn updated_at(&self) -> Instant {
        self.updated_at
    }

    pub fn host(&self) -> &Participant {
        &self.host
    }

    pub fn guest(&self) -> Option<&Participant> {
        self.guest.as_ref()
    }

    pub fn participant(&self, role: Role) -> Option<&Participant> {
        match role {
            Role::Host => Some(&self.host),
            Role::Guest => self.guest.as_ref(),
        }
    }

    fn participant_mut(&mut self, role: Role) -> Option<&mut Participant> {
        match role {
            Role::Host => Some(&mut self.host),
            Role::Guest => self.guest.as_mut(),
        }
    }

    pub fn role_of(&self, peer_id: &PeerId) -> Option<Role> {
        if self.host.peer_id == *peer_id {
            return Some(Role::Host);
        }
        self.guest
            .as_ref()
            .filter(|g| g.peer_id == *peer_id)
            .map(|_| Role::Guest)
    }

    pub fn is_present(&self, role: Role) -> bool {
        self.participant(role).is_some_and(|p| p.is_present)
    }

    pub fn participants_count(&self) -> u8 {
        u8::from(self.host.is_present) + u8::from(self.is_present(Role::Guest))
    }

    pub fn state_payload(&self) -> StatePayload {
        StatePayload::new(self.status, self.participants_count())
    }

    /// Admits a caller. A known `requested` id rejoins its own slot; anyone else
    /// takes the guest slot if it is free or its occupant has been gone past the
    /// grace window.
    pub fn join(
        &mut self,
        requested: Option<&PeerId>,
        now: Instant,
    ) -> Result<(PeerId, Role), CallError> {
        if self.status.is_ended() {
            return Err(CallError::RoomEnded(self.id.clone()));
        }

        if let Some(id) = requested {
            if let Some(role) = self.role_of(id) {
                return Ok((id.clone(), role));
            }
        }

        if let Some(guest) = &self.guest {
            if !guest.absent_longer_than(now, self.grace_window) {
                return Err(CallError::RoomFull(self.id.clone()));
            }
            info!(
                "Call {}: replacing stale guest {} after grace window",
                self.id, guest.peer_id
            );
        }

        self.guests_admitted += 1;
        let peer_id = PeerId::guest(self.guests_admitted);
        self.guest = Some(Participant::new(peer_id.clone(), Role::Guest, now));
        self.updated_at = now;

        Ok((peer_id, Role::Guest))
    }

    /// Marks a participant's socket as live, routing returning participants through
    /// [`CallRoom::mark_reconnected`].
    pub fn mark_connected(
        &mut self,
        peer_id: &PeerId,
        now: Instant,
    ) -> Result<PresenceChange, CallError> {
        let role = self.require_role(peer_id)?;
        if self.status.is_ended() {
            return Err(CallError::RoomEnded(self.id.clone()));
        }

        let change = match self.participant(role) {
            Some(p) if p.is_present => PresenceChange::Superseded,
            Some(p) if p.ever_connected => {
                self.mark_reconnected(peer_id, now)?;
                return Ok(PresenceChange::Reconnected);
            }
            _ => PresenceChange::FirstConnect,
        };

        if let Some(p) = self.participant_mut(role) {
            p.is_present = true;
            p.ever_connected = true;
            p.disconnected_at = None;
            p.left_at = None;
        }
        self.touch(now);

        Ok(change)
    }

    pub fn mark_reconnected(&mut self, peer_id: &PeerId, now: Instant) -> Result<(), CallError> {
        let role = self.require_role(peer_id)?;
        if let Some(p) = self.participant_mut(role) {
            p.is_present = true;
            p.ever_connected = true;
            p.disconnected_at = None;
            p.left_at = None;
            p.reconnect_count += 1;
        }
        self.touch(now);
        Ok(())
    }

    /// Returns `true` if the participant was present until now.
    /// The call status does not change here; only expiry or hangup ends it.
    pub fn mark_disconnected(&mut self, peer_id: &PeerId, now: Instant) -> Result<bool, CallError> {
        let role = self.require_role(peer_id)?;
        let Some(p) = self.participant_mut(role) else {
            return Ok(false);
        };
        if !p.is_present {
            return Ok(false);
        }

        p.is_present = false;
        p.disconnected_at = Some(now);
        self.updated_at = now;
        Ok(true)
    }

    /// Ends the call. Only the first call returns `true`.
    pub fn hangup(&mut self, now: Instant) -> bool {
        if self.status.is_ended() {
            return false;
        }

        self.status = CallStatus::Ended;
        self.updated_at = now;
        self.host.left_at.get_or_insert(now);
        if let Some(guest) = self.guest.as_mut() {
            guest.left_at.get_or_insert(now);
        }
        true
    }

    pub fn expiry(&self, now: Instant) -> Option<ExpiryReason> {
        if self.status.is_ended() {
            return None;
        }
        if now >= self.expires_at {
            return Some(ExpiryReason::TtlExceeded);
        }

        let host_gone = self.host.absent_longer_than(now, self.grace_window);
        let guest_gone = self
            .guest
            .as_ref()
            .is_none_or(|g| g.absent_longer_than(now, self.grace_window));

        if host_gone && guest_gone {
            return Some(ExpiryReason::Abandoned);
        }
        if self.status == CallStatus::Active && (host_gone || guest_gone) {
            return Some(ExpiryReason::PeerAbsent);
        }
        None
    }

    pub fn snapshot(&self, now: Instant) -> CallSnapshot {
        CallSnapshot {
            call_id: self.id.clone(),
            status: self.status,
            participants: ParticipantCount {
                count: self.participants_count(),
            },
            host_present: self.host.is_present,
            guest_present: self.is_present(Role::Guest),
            expires_in_secs: self.expires_at.saturating_duration_since(now).as_secs(),
        }
    }

    fn require_role(&self, peer_id: &PeerId) -> Result<Role, CallError> {
        self.role_of(peer_id).ok_or_else(|| CallError::UnknownPeer {
            call_id: self.id.clone(),
            peer_id: peer_id.clone(),
        })
    }

    fn touch(&mut self, now: Instant) {
        self.updated_at = now;
        if self.status == CallStatus::Waiting && self.participants_count() == 2 {
            self.status = CallStatus::Active;
        }
    }
}
