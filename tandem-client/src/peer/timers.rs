use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    IceGrace,
    RecreateRetry,
    RelayFallback,
    PresenceGrace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub kind: TimerKind,
    pub generation: u64,
}

/// One-shot timers delivered as messages. Re-arming or cancelling a kind
/// invalidates a fire that is already in flight.
pub struct Timers {
    armed: HashMap<TimerKind, (u64, JoinHandle<()>)>,
    generation: u64,
    tx: mpsc::UnboundedSender<TimerFired>,
}

impl Timers {
    pub fn new(tx: mpsc::UnboundedSender<TimerFired>) -> Self {
        Self {
            armed: HashMap::new(),
            generation: 0,
            tx,
        }
    }

    pub fn arm(&mut self, kind: TimerKind, after: Duration) {
        self.cancel(kind);
        self.generation += 1;
        let generation = self.generation;
        let tx = self.tx.clone();
        let deadline = Instant::now() + after;

        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = tx.send(TimerFired { kind, generation });
        });
        self.armed.insert(kind, (generation, handle));
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        if let Some((_, handle)) = self.armed.remove(&kind) {
            handle.abort();
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, (_, handle)) in self.armed.drain() {
            handle.abort();
        }
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.armed.contains_key(&kind)
    }

    pub fn pending(&self) -> usize {
        self.armed.len()
    }

    /// Accepts a fire from the current arming of its kind and disarms it.
    pub fn take_fired(&mut self, fired: TimerFired) -> bool {
        match self.armed.get(&fired.kind) {
            Some((generation, _)) if *generation == fired.generation => {
                self.armed.remove(&fired.kind);
                true
            }
            _ => false,
        }
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
