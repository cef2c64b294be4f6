use crate::call::{CallCommand, CallRoom, ExpiryReason, PresenceChange, SweepVerdict};
use crate::error::CallError;
use crate::signaling::Outbound;
use serde::Serialize;
use std::collections::HashMap;
use tandem_core::{Envelope, JoinPayload, MessageType, PeerId, PresencePayload, Role};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

struct SocketSlot {
    conn_id: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
}

/// Owns one [`CallRoom`] and the outbound channels of its participants' sockets.
/// Every mutation of the call goes through this actor's command queue.
pub struct Call {
    room: CallRoom,
    sockets: HashMap<Role, SocketSlot>,
    command_rx: mpsc::Receiver<CallCommand>,
    ended_retention: Duration,
    ended_at: Option<Instant>,
}

impl Call {
    pub fn new(
        room: CallRoom,
        command_rx: mpsc::Receiver<CallCommand>,
        ended_retention: Duration,
    ) -> Self {
        Self {
            room,
            sockets: HashMap::new(),
            command_rx,
            ended_retention,
            ended_at: None,
        }
    }

    pub async fn run(mut self) {
        info!("Call {} event loop started", self.room.id());

        while let Some(cmd) = self.command_rx.recv().await {
            if !self.handle_command(cmd) {
                break;
            }
        }

        self.close_sockets();
        info!("Call {} event loop finished", self.room.id());
    }

    /// Returns `false` once the actor should stop.
    fn handle_command(&mut self, cmd: CallCommand) -> bool {
        let now = Instant::now();

        match cmd {
            CallCommand::Join { requested, reply } => {
                let result = self.room.join(requested.as_ref(), now);
                if let Ok((peer_id, role)) = &result {
                    info!("Call {}: admitted {} as {}", self.room.id(), peer_id, role);
                }
                let _ = reply.send(result);
            }

            CallCommand::Validate { peer_id, reply } => {
                let result = if self.room.status().is_ended() {
                    Err(CallError::RoomEnded(self.room.id().clone()))
                } else {
                    self.room
                        .role_of(&peer_id)
                        .ok_or_else(|| CallError::UnknownPeer {
                            call_id: self.room.id().clone(),
                            peer_id,
                        })
                };
                let _ = reply.send(result);
            }

            CallCommand::Attach {
                peer_id,
                conn_id,
                outbound,
                reply,
            } => {
                let _ = reply.send(self.attach(peer_id, conn_id, outbound, now));
            }

            CallCommand::Detach { peer_id, conn_id } => self.detach(&peer_id, conn_id, now),

            CallCommand::Relay { from, envelope } => self.relay(from, envelope),

            CallCommand::Hangup { by, reply } => {
                self.end(by.as_ref(), now);
                let _ = reply.send(Ok(()));
            }

            CallCommand::Snapshot { reply } => {
                let _ = reply.send(Ok(self.room.snapshot(now)));
            }

            CallCommand::Sweep { now, reply } => {
                let verdict = self.sweep(now);
                let _ = reply.send(verdict);
                if verdict == SweepVerdict::Purge {
                    return false;
                }
            }
        }

        true
    }

    fn attach(
        &mut self,
        peer_id: PeerId,
        conn_id: u64,
        outbound: mpsc::UnboundedSender<Outbound>,
        now: Instant,
    ) -> Result<JoinPayload, CallError> {
        let change = self.room.mark_connected(&peer_id, now)?;
        let role = self
            .room
            .role_of(&peer_id)
            .ok_or_else(|| CallError::UnknownPeer {
                call_id: self.room.id().clone(),
                peer_id: peer_id.clone(),
            })?;

        let previous = self.sockets.insert(role, SocketSlot { conn_id, outbound });
        if let Some(old) = previous {
            debug!(
                "Call {}: socket {} of {} superseded by {}",
                self.room.id(),
                old.conn_id,
                peer_id,
                conn_id
            );
            let _ = old.outbound.send(Outbound::Close);
        }

        let join = JoinPayload {
            peer_id: peer_id.clone(),
            role,
            is_reconnect: change.is_reconnect(),
            peer_online: self.room.is_present(role.other()),
        };
        info!(
            "Call {}: {} connected ({:?}, peer online: {})",
            self.room.id(),
            peer_id,
            change,
            join.peer_online
        );

        self.send_payload(role, MessageType::Join, &join, None);
        if change == PresenceChange::Reconnected {
            let presence = PresencePayload {
                peer_id: peer_id.clone(),
                is_reconnect: true,
            };
            self.send_payload(
                role.other(),
                MessageType::PeerReconnected,
                &presence,
                Some(&peer_id),
            );
        }
        self.broadcast_state();

        Ok(join)
    }

    fn detach(&mut self, peer_id: &PeerId, conn_id: u64, now: Instant) {
        let Some(role) = self.room.role_of(peer_id) else {
            return;
        };
        match self.sockets.get(&role) {
            Some(slot) if slot.conn_id == conn_id => {
                self.sockets.remove(&role);
            }
            _ => {
                debug!(
                    "Call {}: ignoring close of stale socket {} for {}",
                    self.room.id(),
                    conn_id,
                    peer_id
                );
                return;
            }
        }

        let changed = self.room.mark_disconnected(peer_id, now).unwrap_or(false);
        if !changed || self.room.status().is_ended() {
            return;
        }

        info!("Call {}: {} disconnected", self.room.id(), peer_id);
        let presence = PresencePayload {
            peer_id: peer_id.clone(),
            is_reconnect: false,
        };
        self.send_payload(
            role.other(),
            MessageType::PeerDisconnected,
            &presence,
            Some(peer_id),
        );
        self.broadcast_state();
    }

    fn relay(&mut self, from: PeerId, envelope: Envelope) {
        if self.room.status().is_ended() {
            debug!("Call {}: dropping {} after end", self.room.id(), envelope.kind);
            return;
        }
        let Some(role) = self.room.role_of(&from) else {
            warn!("Call {}: relay from unknown peer {}", self.room.id(), from);
            return;
        };

        let target = role.other();
        if !self.room.is_present(target) {
            debug!(
                "Call {}: dropping {} from {}, peer offline",
                self.room.id(),
                envelope.kind,
                from
            );
            return;
        }

        self.send(target, envelope.with_from(from));
    }

    fn end(&mut self, by: Option<&PeerId>, now: Instant) {
        if !self.room.hangup(now) {
            return;
        }
        self.ended_at = Some(now);

        match by {
            Some(peer_id) => info!("Call {} ended by {}", self.room.id(), peer_id),
            None => info!("Call {} ended", self.room.id()),
        }

        if let Some(peer_id) = by {
            if let Some(role) = self.room.role_of(peer_id) {
                let leave = Envelope::bare(MessageType::Leave).with_from(peer_id.clone());
                self.send(role.other(), leave);
            }
        }

        self.broadcast_state();
        self.close_sockets();
    }

    fn sweep(&mut self, now: Instant) -> SweepVerdict {
        if let Some(ended_at) = self.ended_at {
            return if now.saturating_duration_since(ended_at) >= self.ended_retention {
                SweepVerdict::Purge
            } else {
                SweepVerdict::Retained
            };
        }

        match self.room.expiry(now) {
            Some(reason) => {
                info!("Call {} expired: {:?}", self.room.id(), reason);
                // The side that stayed away leaves; the other one is told so.
                let absent = match reason {
                    ExpiryReason::PeerAbsent => self.longest_absent(),
                    ExpiryReason::TtlExceeded | ExpiryReason::Abandoned => None,
                };
                self.end(absent.as_ref(), now);
                SweepVerdict::Expired(reason)
            }
            None => SweepVerdict::Alive,
        }
    }

    fn longest_absent(&self) -> Option<PeerId> {
        [Role::Host, Role::Guest]
            .into_iter()
            .filter_map(|role| self.room.participant(role))
            .filter_map(|p| p.absent_since().map(|since| (since, &p.peer_id)))
            .min_by_key(|(since, _)| *since)
            .map(|(_, peer_id)| peer_id.clone())
    }

    fn broadcast_state(&self) {
        let state = self.room.state_payload();
        for role in [Role::Host, Role::Guest] {
            self.send_payload(role, MessageType::State, &state, None);
        }
    }

    fn send_payload<T: Serialize>(
        &self,
        role: Role,
        kind: MessageType,
        data: &T,
        from: Option<&PeerId>,
    ) {
        match Envelope::new(kind, data) {
            Ok(envelope) => {
                let envelope = match from {
                    Some(from) => envelope.with_from(from.clone()),
                    None => envelope,
                };
                self.send(role, envelope);
            }
            Err(e) => error!("Failed to encode {}: {}", kind, e),
        }
    }

    fn send(&self, role: Role, envelope: Envelope) {
        let Some(slot) = self.sockets.get(&role) else {
            return;
        };
        if slot.outbound.send(Outbound::Envelope(envelope)).is_err() {
            debug!("Call {}: socket of {} already gone", self.room.id(), role);
        }
    }

    fn close_sockets(&mut self) {
        for (_, slot) in self.sockets.drain() {
            let _ = slot.outbound.send(Outbound::Close);
        }
    }
}
