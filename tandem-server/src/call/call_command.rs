use crate::call::ExpiryReason;
use crate::error::CallError;
use crate::signaling::Outbound;
use tandem_core::{CallSnapshot, Envelope, JoinPayload, PeerId, Role};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

pub type Reply<T> = oneshot::Sender<Result<T, CallError>>;

/// Commands delivered to a call actor by the HTTP and WebSocket layers.
#[derive(Debug)]
pub enum CallCommand {
    /// Claim a slot. `requested` rejoins an existing identity.
    Join {
        requested: Option<PeerId>,
        reply: Reply<(PeerId, Role)>,
    },

    /// Check that a peer may open a socket, before the upgrade happens.
    Validate { peer_id: PeerId, reply: Reply<Role> },

    /// A socket for `peer_id` is open. Replaces any earlier socket of the same peer.
    Attach {
        peer_id: PeerId,
        conn_id: u64,
        outbound: mpsc::UnboundedSender<Outbound>,
        reply: Reply<JoinPayload>,
    },

    /// A socket closed. Ignored when `conn_id` belongs to a superseded socket.
    Detach { peer_id: PeerId, conn_id: u64 },

    /// Forward a negotiation message to the other participant.
    Relay { from: PeerId, envelope: Envelope },

    /// End the call. `by` is the participant that left, if any.
    Hangup {
        by: Option<PeerId>,
        reply: Reply<()>,
    },

    Snapshot { reply: Reply<CallSnapshot> },

    Sweep {
        now: Instant,
        reply: oneshot::Sender<SweepVerdict>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepVerdict {
    Alive,
    /// Ended by this sweep.
    Expired(ExpiryReason),
    /// Already ended, still inside the retention window.
    Retained,
    /// Retention is over; the actor has stopped and the entry should be dropped.
    Purge,
}
