use crate::config::ClientConfig;
use crate::error::SignalingError;
use crate::signaling::client::Connection;
use crate::signaling::{SignalingClient, SignalingEvents, Subscription};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::{Arc, Weak};
use tandem_core::{CallId, PeerId};
use tracing::debug;

/// Hands out shared signaling sockets: at most one live socket per
/// `(call, peer)`, however many local consumers subscribe to it.
#[derive(Clone)]
pub struct SignalingHub {
    config: Arc<ClientConfig>,
    connections: Arc<DashMap<(CallId, PeerId), Weak<Connection>>>,
}

impl SignalingHub {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config: Arc::new(config),
            connections: Arc::new(DashMap::new()),
        }
    }

    /// Returns the socket for `(call_id, peer_id)`, opening it if no live one exists.
    pub fn client(&self, call_id: &CallId, peer_id: &PeerId) -> Result<SignalingClient, SignalingError> {
        let key = (call_id.clone(), peer_id.clone());

        let connection = match self.connections.entry(key) {
            Entry::Occupied(mut entry) => match entry.get().upgrade() {
                Some(connection) => connection,
                None => {
                    let connection = Connection::spawn(&self.config, call_id, peer_id)?;
                    entry.insert(Arc::downgrade(&connection));
                    connection
                }
            },
            Entry::Vacant(entry) => {
                debug!("Opening signaling socket for {} in {}", peer_id, call_id);
                let connection = Connection::spawn(&self.config, call_id, peer_id)?;
                entry.insert(Arc::downgrade(&connection));
                connection
            }
        };

        Ok(SignalingClient::new(connection))
    }

    pub fn connect(
        &self,
        call_id: &CallId,
        peer_id: &PeerId,
        handler: Arc<dyn SignalingEvents>,
    ) -> Result<Subscription, SignalingError> {
        Ok(self.client(call_id, peer_id)?.subscribe(handler))
    }

    /// Number of sockets still referenced by someone.
    pub fn live_connections(&self) -> usize {
        self.connections.retain(|_, weak| weak.strong_count() > 0);
        self.connections.len()
    }
}
