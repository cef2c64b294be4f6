use tandem_core::{CallStatus, JoinPayload, MessageType, PresencePayload};

use crate::integration::init_tracing;
use crate::utils::{TestClient, TestServer, connect_pair, offer, wait_for_state};

#[tokio::test]
async fn test_guest_reconnect_is_announced() {
    init_tracing();
    let server = TestServer::start().await.unwrap();
    let call = connect_pair(&server).await.unwrap();
    let mut host = call.host;

    call.guest.close().await.unwrap();

    let gone: PresencePayload = host
        .recv_type(MessageType::PeerDisconnected)
        .await
        .unwrap()
        .decode()
        .unwrap();
    assert_eq!(gone.peer_id, call.guest_id);
    wait_for_state(&mut host, CallStatus::Active, 1).await.unwrap();

    let mut guest = TestClient::connect(&server, &call.call_id, &call.guest_id)
        .await
        .unwrap();
    let join: JoinPayload = guest
        .recv_type(MessageType::Join)
        .await
        .unwrap()
        .decode()
        .unwrap();
    assert!(join.is_reconnect);
    assert!(join.peer_online);

    let back: PresencePayload = host
        .recv_type(MessageType::PeerReconnected)
        .await
        .unwrap()
        .decode()
        .unwrap();
    assert_eq!(back.peer_id, call.guest_id);
    assert!(back.is_reconnect);
    wait_for_state(&mut host, CallStatus::Active, 2).await.unwrap();
}

#[tokio::test]
async fn test_newer_socket_supersedes_older_one() {
    init_tracing();
    let server = TestServer::start().await.unwrap();
    let mut call = connect_pair(&server).await.unwrap();

    let mut replacement = TestClient::connect(&server, &call.call_id, &call.guest_id)
        .await
        .unwrap();
    replacement.recv_type(MessageType::Join).await.unwrap();
    call.guest.expect_closed().await.unwrap();

    call.host.send(&offer("after-supersede")).await.unwrap();
    let relayed = replacement.recv_type(MessageType::Offer).await.unwrap();
    assert_eq!(relayed.kind, "offer");
}

#[tokio::test]
async fn test_messages_for_absent_peer_are_dropped() {
    init_tracing();
    let server = TestServer::start().await.unwrap();
    let created = server.create_call().await.unwrap();

    let mut host = TestClient::connect(&server, &created.call_id, &created.host_peer_id)
        .await
        .unwrap();
    host.recv_type(MessageType::Join).await.unwrap();
    host.send(&offer("nobody-home")).await.unwrap();

    let joined = server.join_call(&created.call_id).await.unwrap();
    let mut guest = TestClient::connect(&server, &created.call_id, &joined.peer_id)
        .await
        .unwrap();
    guest.recv_type(MessageType::Join).await.unwrap();
    let state = guest.recv_type(MessageType::State).await.unwrap();
    assert_eq!(state.kind, "state");

    host.send(&offer("second")).await.unwrap();
    let relayed = guest.recv_type(MessageType::Offer).await.unwrap();
    let sdp: tandem_core::SessionDescription = relayed.decode().unwrap();
    assert_eq!(sdp.sdp, "second");
}
