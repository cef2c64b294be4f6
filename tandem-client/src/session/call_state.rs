use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    LocalHangup,
    RemoteHangup,
    /// The server reported the call as ended.
    CallEnded,
    /// The server closed the signaling socket without saying why.
    SignalingClosed,
    SignalingRejected,
    MediaUnavailable,
    NegotiationFailed,
    PresenceTimeout,
    RecreationExhausted,
}

impl EndReason {
    /// Whether the call ended because something went wrong rather than
    /// because a participant hung up.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            EndReason::SignalingRejected
                | EndReason::MediaUnavailable
                | EndReason::NegotiationFailed
                | EndReason::PresenceTimeout
                | EndReason::RecreationExhausted
        )
    }

    /// Whether the other side still needs to hear that this participant left.
    pub(crate) fn announces_leave(self) -> bool {
        matches!(
            self,
            EndReason::LocalHangup | EndReason::PresenceTimeout | EndReason::RecreationExhausted
        )
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            EndReason::LocalHangup => "you hung up",
            EndReason::RemoteHangup => "the other participant hung up",
            EndReason::CallEnded => "the call has ended",
            EndReason::SignalingClosed => "the server closed the connection",
            EndReason::SignalingRejected => "the server refused the connection",
            EndReason::MediaUnavailable => "camera or microphone unavailable",
            EndReason::NegotiationFailed => "could not set up the peer connection",
            EndReason::PresenceTimeout => "the other participant did not come back",
            EndReason::RecreationExhausted => "could not re-establish media",
        };
        f.write_str(text)
    }
}

/// What a caller sees of a call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Connecting,
    WaitingForPeer,
    Connected,
    Reconnecting,
    PeerDisconnected,
    Ended(EndReason),
    Failed(EndReason),
}

impl CallState {
    pub fn finished(reason: EndReason) -> Self {
        if reason.is_failure() {
            CallState::Failed(reason)
        } else {
            CallState::Ended(reason)
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Ended(_) | CallState::Failed(_))
    }
}
