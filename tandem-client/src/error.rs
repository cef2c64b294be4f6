use tandem_core::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("signaling socket is not open")]
    NotOpen,

    #[error("signaling client has shut down")]
    Closed,

    #[error("server refused the signaling socket with status {0}")]
    Rejected(u16),

    #[error("invalid signaling url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("webrtc: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("{0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
#[error("media unavailable: {0}")]
pub struct MediaError(pub String);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid server url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered {status}: {message}")]
    Server { status: u16, message: String },
}

/// Errors that surface through a call session. Only `MediaAcquisition`,
/// `PresenceTimeout` and `RecreationExhausted` end a call; the rest are
/// absorbed by the recovery ladder or ignored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("could not acquire local media: {0}")]
    MediaAcquisition(String),

    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("offer received in the wrong negotiation state")]
    StaleOffer,

    #[error("answer received without a pending local offer")]
    StaleAnswer,

    #[error("peer did not come back within the grace window")]
    PresenceTimeout,

    #[error("gave up after {0} peer connection rebuilds")]
    RecreationExhausted(u32),

    #[error("signaling unavailable: {0}")]
    SignalingUnavailable(String),

    #[error("session is closed")]
    Closed,
}
