use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tandem_client::{SignalingError, SignalingOutput};
use tandem_core::{Envelope, MessageType};

/// Records what the peer session sends; `ready` mimics the socket being open.
pub struct MockSignaling {
    ready: AtomicBool,
    sent: Mutex<Vec<Envelope>>,
}

impl MockSignaling {
    pub fn new(ready: bool) -> Self {
        Self {
            ready: AtomicBool::new(ready),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_types(&self) -> Vec<String> {
        self.sent().into_iter().map(|e| e.kind).collect()
    }

    pub fn count(&self, kind: MessageType) -> usize {
        self.sent().iter().filter(|e| e.kind == kind.as_str()).count()
    }
}

impl SignalingOutput for MockSignaling {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn send(&self, envelope: Envelope) -> Result<(), SignalingError> {
        let time_sensitive = envelope
            .message_type()
            .is_ok_and(MessageType::is_time_sensitive);
        if time_sensitive && !self.is_ready() {
            return Err(SignalingError::NotOpen);
        }
        self.sent.lock().unwrap().push(envelope);
        Ok(())
    }
}
