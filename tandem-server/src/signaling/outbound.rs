use tandem_core::Envelope;

/// Frames a call actor pushes to one participant's socket task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Envelope(Envelope),
    /// Close the socket with a normal close frame.
    Close,
}
