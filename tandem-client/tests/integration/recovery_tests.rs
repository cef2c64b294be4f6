use super::{Harness, SECOND, presence};
use crate::utils::{MockConnector, advance, settle};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tandem_client::{
    ApiError, PeerConnectionState, ReconnectionState, SessionError, SignalingEvents,
    TurnConfigCache, TurnConfigSource,
};
use tandem_core::{IceServerConfig, MessageType, Role};

struct CountingTurn(Arc<AtomicU64>);

#[async_trait]
impl TurnConfigSource for CountingTurn {
    async fn fetch(&self) -> Result<Vec<IceServerConfig>, ApiError> {
        let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(vec![IceServerConfig {
            urls: vec!["turn:relay.test:3478".into()],
            username: Some(format!("u{n}")),
            credential: Some("p".into()),
        }])
    }
}

/// A credential endpoint that never answers.
struct StalledTurn;

#[async_trait]
impl TurnConfigSource for StalledTurn {
    async fn fetch(&self) -> Result<Vec<IceServerConfig>, ApiError> {
        std::future::pending().await
    }
}

async fn connected_host() -> Harness {
    let h = Harness::start(Role::Host).await;
    h.negotiate().await;
    h.connector.latest().emit_state(PeerConnectionState::Connected);
    settle().await;
    h
}

#[tokio::test(start_paused = true)]
async fn short_ice_blip_is_absorbed() {
    let h = connected_host().await;
    let peer = h.connector.latest();

    peer.emit_state(PeerConnectionState::Disconnected);
    settle().await;
    assert_eq!(
        h.manager.status().reconnection,
        ReconnectionState::WaitingForIce
    );

    advance(2 * SECOND).await;
    peer.emit_state(PeerConnectionState::Connected);
    settle().await;
    advance(5 * SECOND).await;

    let status = h.manager.status();
    assert_eq!(h.connector.created(), 1);
    assert_eq!(status.reconnection, ReconnectionState::Idle);
    assert_eq!(status.pending_timers, 0);
}

#[tokio::test(start_paused = true)]
async fn disconnect_outlasting_grace_rebuilds_peer() {
    let h = connected_host().await;

    h.connector.latest().emit_state(PeerConnectionState::Disconnected);
    settle().await;
    advance(3 * SECOND + Duration::from_millis(10)).await;

    assert_eq!(h.connector.created(), 2);
    let old = h.connector.peer(0);
    assert!(old.is_detached() && old.is_closed());
    assert_eq!(
        h.signaling.sent_types(),
        ["offer", "renegotiate-request", "offer"]
    );
    assert_eq!(h.manager.status().recreate_attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn failure_rebuilds_at_once_with_fresh_relay_credentials() {
    let fetches = Arc::new(AtomicU64::new(0));
    let turn = Arc::new(TurnConfigCache::new(
        Box::new(CountingTurn(fetches.clone())),
        Duration::from_secs(5),
    ));
    let h = Harness::start_with(Role::Host, MockConnector::new(), Some(turn)).await;
    h.negotiate().await;

    h.connector.latest().emit_state(PeerConnectionState::Failed);
    settle().await;

    assert_eq!(h.connector.created(), 2);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    let rebuilt = h.connector.latest();
    assert_eq!(
        rebuilt.config.ice_servers[0].username.as_deref(),
        Some("u1")
    );
    assert_eq!(h.manager.status().epoch, 2);
}

#[tokio::test(start_paused = true)]
async fn destroy_is_not_held_up_by_a_stalled_credential_refresh() {
    let turn = Arc::new(
        TurnConfigCache::new(Box::new(StalledTurn), Duration::from_secs(5))
            .with_fetch_timeout(Duration::from_secs(60)),
    );
    let h = Harness::start_with(Role::Host, MockConnector::new(), Some(turn)).await;
    h.negotiate().await;

    h.connector.latest().emit_state(PeerConnectionState::Failed);
    settle().await;

    let destroyed = tokio::time::timeout(SECOND, h.manager.destroy()).await;
    assert!(destroyed.is_ok(), "destroy waited on the credential fetch");

    let status = h.manager.status();
    assert!(status.destroyed);
    assert_eq!(status.pending_timers, 0);
    assert!(h.connector.peer(0).is_closed());
}

#[tokio::test(start_paused = true)]
async fn simultaneous_failure_and_presence_loss_build_one_peer() {
    let h = connected_host().await;

    h.connector.latest().emit_state(PeerConnectionState::Failed);
    h.manager
        .process_signal(&presence(MessageType::PeerDisconnected))
        .unwrap();
    h.manager
        .process_signal(&presence(MessageType::PeerReconnected))
        .unwrap();
    settle().await;

    assert_eq!(h.connector.created(), 2);
    assert_eq!(h.signaling.count(MessageType::RenegotiateRequest), 1);
}

#[tokio::test(start_paused = true)]
async fn events_from_a_replaced_peer_are_ignored() {
    let h = connected_host().await;
    let old = h.connector.latest();

    old.emit_state(PeerConnectionState::Failed);
    settle().await;
    assert_eq!(h.connector.created(), 2);

    old.emit_state(PeerConnectionState::Failed);
    old.emit_state(PeerConnectionState::Connected);
    settle().await;

    let status = h.manager.status();
    assert_eq!(h.connector.created(), 2);
    assert_ne!(status.connection, PeerConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn unconnected_rebuild_falls_back_to_relay() {
    let h = connected_host().await;

    h.connector.latest().emit_state(PeerConnectionState::Failed);
    settle().await;
    assert!(!h.connector.latest().config.relay_only);

    advance(8 * SECOND + Duration::from_millis(10)).await;

    assert_eq!(h.connector.created(), 3);
    assert!(h.connector.latest().config.relay_only);
    assert!(h.manager.status().relay_only);
}

#[tokio::test(start_paused = true)]
async fn connecting_after_rebuild_clears_timers_and_attempts() {
    let h = connected_host().await;

    h.connector.latest().emit_state(PeerConnectionState::Failed);
    settle().await;
    assert_eq!(h.manager.status().recreate_attempts, 1);

    h.connector.latest().emit_state(PeerConnectionState::Connected);
    settle().await;

    let status = h.manager.status();
    assert_eq!(status.recreate_attempts, 0);
    assert_eq!(status.pending_timers, 0);
    assert_eq!(status.reconnection, ReconnectionState::Idle);

    advance(30 * SECOND).await;
    assert_eq!(h.connector.created(), 2);
}

#[tokio::test(start_paused = true)]
async fn rebuild_retries_until_signaling_returns() {
    let h = connected_host().await;
    h.signaling.set_ready(false);

    h.connector.latest().emit_state(PeerConnectionState::Failed);
    settle().await;
    assert_eq!(
        h.manager.status().reconnection,
        ReconnectionState::RetryScheduled
    );
    assert_eq!(h.connector.created(), 1);

    h.signaling.set_ready(true);
    h.manager.signal_handler().on_reconnected();
    settle().await;

    assert_eq!(h.connector.created(), 2);
    assert_eq!(h.manager.status().recreate_attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn rebuilds_are_bounded() {
    let h = connected_host().await;
    h.signaling.set_ready(false);

    h.connector.latest().emit_state(PeerConnectionState::Failed);
    settle().await;
    for _ in 0..5 {
        advance(2 * SECOND + Duration::from_millis(10)).await;
    }

    let status = h.manager.status();
    assert_eq!(status.terminal, Some(SessionError::RecreationExhausted(5)));
    assert_eq!(status.pending_timers, 0);
    assert_eq!(h.observer.terminal().len(), 1);
    assert!(h.connector.latest().is_closed());

    advance(60 * SECOND).await;
    assert_eq!(h.observer.terminal().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_peer_creation_is_retried() {
    let h = connected_host().await;
    h.connector.fail_next_creates(1);

    h.connector.latest().emit_state(PeerConnectionState::Failed);
    settle().await;
    assert_eq!(h.connector.created(), 1);

    advance(2 * SECOND + Duration::from_millis(10)).await;
    assert_eq!(h.connector.created(), 2);
}

#[tokio::test(start_paused = true)]
async fn absent_peer_ends_session_once() {
    let h = connected_host().await;

    h.signal(presence(MessageType::PeerDisconnected)).await;
    assert_eq!(
        h.manager.status().reconnection,
        ReconnectionState::PeerDisconnected
    );

    advance(29 * SECOND).await;
    assert!(h.observer.terminal().is_empty());

    advance(2 * SECOND).await;
    assert_eq!(h.observer.terminal(), [SessionError::PresenceTimeout]);

    let status = h.manager.status();
    assert_eq!(status.pending_timers, 0);
    assert_eq!(status.connection, PeerConnectionState::Closed);

    h.signal(presence(MessageType::PeerDisconnected)).await;
    advance(60 * SECOND).await;
    assert_eq!(h.observer.terminal().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn peer_returning_in_time_keeps_connected_session() {
    let h = connected_host().await;

    h.signal(presence(MessageType::PeerDisconnected)).await;
    advance(10 * SECOND).await;
    h.signal(presence(MessageType::PeerReconnected)).await;
    advance(60 * SECOND).await;

    let status = h.manager.status();
    assert!(status.terminal.is_none());
    assert_eq!(status.reconnection, ReconnectionState::Idle);
    assert_eq!(h.connector.created(), 1);
}

#[tokio::test(start_paused = true)]
async fn host_rebuilds_when_guest_returns_to_dead_media() {
    let h = connected_host().await;

    h.signal(presence(MessageType::PeerDisconnected)).await;
    h.connector.latest().emit_state(PeerConnectionState::Disconnected);
    settle().await;
    h.signal(presence(MessageType::PeerReconnected)).await;

    assert_eq!(h.connector.created(), 2);
    assert_eq!(h.signaling.count(MessageType::Offer), 2);
}

#[tokio::test(start_paused = true)]
async fn guest_waits_for_offer_when_host_returns() {
    let h = Harness::start(Role::Guest).await;
    h.signal(super::offer("offer-1")).await;

    h.signal(presence(MessageType::PeerDisconnected)).await;
    h.signal(presence(MessageType::PeerReconnected)).await;

    assert_eq!(h.connector.created(), 1);
    assert_eq!(
        h.manager.status().reconnection,
        ReconnectionState::AwaitingOffer
    );
}

#[tokio::test(start_paused = true)]
async fn renegotiate_request_makes_host_offer_again() {
    let h = connected_host().await;

    h.signal(tandem_core::Envelope::bare(MessageType::RenegotiateRequest))
        .await;

    assert_eq!(h.connector.created(), 2);
    assert_eq!(h.signaling.sent_types(), ["offer", "offer"]);
}
