use super::init_tracing;
use crate::utils::{MockConnector, TestServer, eventually};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tandem_client::{
    CallApi, CallContext, CallSession, CallState, EndReason, LocalStream, MediaError,
    MediaPeer, MediaSource, PeerConnectionState, SessionDeps, SessionError, SignalingHub,
};
use tandem_core::{CallStatus, Role};

struct NoMedia;

#[async_trait]
impl MediaSource for NoMedia {
    async fn acquire(&self) -> Result<LocalStream, MediaError> {
        Ok(LocalStream::default())
    }
}

struct DeniedMedia;

#[async_trait]
impl MediaSource for DeniedMedia {
    async fn acquire(&self) -> Result<LocalStream, MediaError> {
        Err(MediaError("permission denied".into()))
    }
}

struct Side {
    session: CallSession,
    connector: Arc<MockConnector>,
}

async fn start_side(server: &TestServer, context: CallContext) -> Result<Side> {
    let connector = MockConnector::auto_connecting();
    let session = CallSession::start(
        &server.client_config(),
        context,
        SessionDeps {
            media: Arc::new(NoMedia),
            connector: connector.clone(),
            hub: SignalingHub::new(server.client_config()),
            turn: None,
        },
    )
    .await?;
    Ok(Side { session, connector })
}

async fn connected_pair(server: &TestServer) -> Result<(CallApi, Side, Side)> {
    let api = CallApi::new(&server.client_config())?;
    let created = api.create_call().await?;
    let joined = api.join_call(&created.call_id, None).await?;
    assert_eq!(joined.role, Role::Guest);
    assert_eq!(joined.peer_id.as_str(), "guest-1");

    let host = start_side(server, CallContext::host(&created)).await?;
    let guest = start_side(server, CallContext::joined(&created.call_id, &joined)).await?;

    eventually("host connected", || host.session.state() == CallState::Connected).await;
    eventually("guest connected", || guest.session.state() == CallState::Connected).await;
    Ok((api, host, guest))
}

fn count_ops(connector: &MockConnector, op: &str) -> usize {
    connector
        .latest()
        .ops()
        .iter()
        .filter(|o| o.as_str() == op)
        .count()
}

#[tokio::test]
async fn two_sides_connect_with_a_single_offer() -> Result<()> {
    init_tracing();
    let server = TestServer::start().await?;
    let (api, host, guest) = connected_pair(&server).await?;

    assert_eq!(host.connector.created(), 1);
    assert_eq!(guest.connector.created(), 1);
    assert_eq!(count_ops(&host.connector, "create_offer"), 1);
    assert_eq!(count_ops(&guest.connector, "create_answer"), 1);
    assert!(host.session.peer_status().offer_sent);
    assert!(!guest.session.peer_status().offer_sent);
    assert!(host.session.local_stream().is_some());

    let snapshot = api.snapshot(&host.session.context().call_id).await?;
    assert_eq!(snapshot.status, CallStatus::Active);
    assert_eq!(snapshot.participants.count, 2);
    Ok(())
}

#[tokio::test]
async fn hangup_ends_both_sides_once() -> Result<()> {
    init_tracing();
    let server = TestServer::start().await?;
    let (api, host, guest) = connected_pair(&server).await?;
    let guest_states = guest.session.watch_state();

    host.session.hangup().await;
    host.session.hangup().await;
    assert_eq!(
        host.session.state(),
        CallState::Ended(EndReason::LocalHangup)
    );

    eventually("guest ended", || guest.session.state().is_terminal()).await;
    assert_eq!(
        guest.session.state(),
        CallState::Ended(EndReason::RemoteHangup)
    );
    assert_eq!(
        *guest_states.borrow(),
        CallState::Ended(EndReason::RemoteHangup)
    );

    let host_status = host.session.peer_status();
    assert!(host_status.destroyed);
    assert_eq!(host_status.pending_timers, 0);
    assert!(host.connector.latest().is_closed());
    assert_eq!(
        guest.session.peer_status().connection,
        PeerConnectionState::Closed
    );
    assert!(!host.session.retry());

    let snapshot = api.snapshot(&host.session.context().call_id).await?;
    assert_eq!(snapshot.status, CallStatus::Ended);
    Ok(())
}

#[tokio::test]
async fn denied_media_fails_start() -> Result<()> {
    init_tracing();
    let server = TestServer::start().await?;
    let api = CallApi::new(&server.client_config())?;
    let created = api.create_call().await?;

    let result = CallSession::start(
        &server.client_config(),
        CallContext::host(&created),
        SessionDeps {
            media: Arc::new(DeniedMedia),
            connector: MockConnector::new(),
            hub: SignalingHub::new(server.client_config()),
            turn: None,
        },
    )
    .await;

    match result {
        Err(SessionError::MediaAcquisition(message)) => assert_eq!(message, "permission denied"),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("session started without media"),
    }
    Ok(())
}

#[tokio::test]
async fn retry_rebuilds_and_reconnects() -> Result<()> {
    init_tracing();
    let server = TestServer::start().await?;
    let (_api, host, guest) = connected_pair(&server).await?;

    assert!(host.session.retry());
    eventually("host rebuilt", || host.connector.created() == 2).await;
    eventually("guest answered again", || {
        count_ops(&guest.connector, "create_answer") == 1 && guest.connector.created() >= 2
    })
    .await;
    eventually("host reconnected", || {
        host.session.state() == CallState::Connected
            && host.connector.latest().negotiation_state()
                == tandem_client::NegotiationState::Stable
    })
    .await;
    assert!(!host.session.state().is_terminal());
    Ok(())
}
