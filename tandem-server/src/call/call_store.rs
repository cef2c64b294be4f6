use crate::call::{Call, CallCommand, CallRoom, SweepVerdict};
use crate::error::CallError;
use crate::signaling::Outbound;
use dashmap::DashMap;
use std::sync::Arc;
use tandem_core::{
    CallId, CallSnapshot, CreateCallResponse, Envelope, JoinCallResponse, JoinPayload, PeerId,
    Role,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct StoreSettings {
    pub grace_window: Duration,
    pub call_ttl: Duration,
    pub ended_retention: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            grace_window: Duration::from_secs(30),
            call_ttl: Duration::from_secs(4 * 60 * 60),
            ended_retention: Duration::from_secs(5 * 60),
        }
    }
}

/// Registry of live calls. Each call runs as its own actor; the store only holds
/// the command senders.
#[derive(Clone)]
pub struct CallStore {
    calls: Arc<DashMap<CallId, mpsc::Sender<CallCommand>>>,
    settings: StoreSettings,
}

impl CallStore {
    pub fn new(settings: StoreSettings) -> Self {
        Self {
            calls: Arc::new(DashMap::new()),
            settings,
        }
    }

    pub fn create_call(&self) -> CreateCallResponse {
        let call_id = CallId::new();
        let room = CallRoom::new(
            call_id.clone(),
            Instant::now(),
            self.settings.call_ttl,
            self.settings.grace_window,
        );

        let (tx, rx) = mpsc::channel(100);
        let call = Call::new(room, rx, self.settings.ended_retention);
        tokio::spawn(call.run());

        info!("Created call {}", call_id);
        self.calls.insert(call_id.clone(), tx);

        CreateCallResponse {
            call_id,
            host_peer_id: PeerId::host(),
        }
    }

    pub async fn join_call(
        &self,
        call_id: &CallId,
        requested: Option<PeerId>,
    ) -> Result<JoinCallResponse, CallError> {
        let (peer_id, role) = self
            .request(call_id, |reply| CallCommand::Join { requested, reply })
            .await??;
        Ok(JoinCallResponse { peer_id, role })
    }

    pub async fn validate(&self, call_id: &CallId, peer_id: &PeerId) -> Result<Role, CallError> {
        let peer_id = peer_id.clone();
        self.request(call_id, |reply| CallCommand::Validate { peer_id, reply })
            .await?
    }

    pub async fn attach(
        &self,
        call_id: &CallId,
        peer_id: &PeerId,
        conn_id: u64,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Result<JoinPayload, CallError> {
        let peer_id = peer_id.clone();
        self.request(call_id, |reply| CallCommand::Attach {
            peer_id,
            conn_id,
            outbound,
            reply,
        })
        .await?
    }

    pub async fn mark_disconnected(&self, call_id: &CallId, peer_id: &PeerId, conn_id: u64) {
        let cmd = CallCommand::Detach {
            peer_id: peer_id.clone(),
            conn_id,
        };
        self.notify(call_id, cmd).await;
    }

    pub async fn relay(&self, call_id: &CallId, from: &PeerId, envelope: Envelope) {
        let cmd = CallCommand::Relay {
            from: from.clone(),
            envelope,
        };
        self.notify(call_id, cmd).await;
    }

    pub async fn hangup(&self, call_id: &CallId, by: Option<PeerId>) -> Result<(), CallError> {
        self.request(call_id, |reply| CallCommand::Hangup { by, reply })
            .await?
    }

    pub async fn snapshot(&self, call_id: &CallId) -> Result<CallSnapshot, CallError> {
        self.request(call_id, |reply| CallCommand::Snapshot { reply })
            .await?
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Ends calls whose participants are all gone or whose TTL passed, and drops
    /// ended calls once their retention is over. Returns the ids ended by this pass.
    pub async fn sweep_expired(&self, now: Instant) -> Vec<CallId> {
        let entries: Vec<(CallId, mpsc::Sender<CallCommand>)> = self
            .calls
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut expired = Vec::new();
        for (call_id, tx) in entries {
            let (reply, rx) = oneshot::channel();
            let verdict = match tx.send(CallCommand::Sweep { now, reply }).await {
                Ok(()) => rx.await.unwrap_or(SweepVerdict::Purge),
                Err(_) => SweepVerdict::Purge,
            };

            match verdict {
                SweepVerdict::Alive | SweepVerdict::Retained => {}
                SweepVerdict::Expired(_) => expired.push(call_id),
                SweepVerdict::Purge => {
                    debug!("Purging call {}", call_id);
                    self.calls.remove(&call_id);
                }
            }
        }
        expired
    }

    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let expired = store.sweep_expired(Instant::now()).await;
                if !expired.is_empty() {
                    info!("Sweeper ended {} call(s)", expired.len());
                }
            }
        })
    }

    fn sender(&self, call_id: &CallId) -> Result<mpsc::Sender<CallCommand>, CallError> {
        self.calls
            .get(call_id)
            .map(|tx| tx.clone())
            .ok_or_else(|| CallError::RoomNotFound(call_id.clone()))
    }

    async fn request<T>(
        &self,
        call_id: &CallId,
        make: impl FnOnce(oneshot::Sender<T>) -> CallCommand,
    ) -> Result<T, CallError> {
        let tx = self.sender(call_id)?;
        let (reply, rx) = oneshot::channel();
        tx.send(make(reply))
            .await
            .map_err(|_| CallError::StoreUnavailable(call_id.clone()))?;
        rx.await
            .map_err(|_| CallError::StoreUnavailable(call_id.clone()))
    }

    async fn notify(&self, call_id: &CallId, cmd: CallCommand) {
        let Ok(tx) = self.sender(call_id) else {
            debug!("Dropping command for unknown call {}", call_id);
            return;
        };
        if tx.send(cmd).await.is_err() {
            warn!("Call {} actor is gone", call_id);
        }
    }
}
