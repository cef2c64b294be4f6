use thiserror::Error;

/// A signaling envelope that could not be understood. Receivers log these and keep the
/// connection open.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("unknown message type `{0}`")]
    UnknownType(String),

    #[error("message `{0}` carries no payload")]
    MissingData(String),

    #[error("invalid payload for `{kind}`: {source}")]
    InvalidData {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}
