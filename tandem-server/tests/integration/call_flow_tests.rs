use tandem_core::{
    CallStatus, IceCandidate, MessageType, PeerId, SessionDescription, StatePayload,
};

use crate::integration::init_tracing;
use crate::utils::{TestServer, answer, candidate, connect_pair, offer, wait_for_state};

#[tokio::test]
async fn test_offer_answer_and_candidates_are_relayed() {
    init_tracing();
    let server = TestServer::start().await.unwrap();
    let mut call = connect_pair(&server).await.unwrap();

    call.host.send(&offer("v=0 host-offer")).await.unwrap();
    let relayed = call.guest.recv_type(MessageType::Offer).await.unwrap();
    assert_eq!(relayed.from, Some(PeerId::host()));
    let sdp: SessionDescription = relayed.decode().unwrap();
    assert_eq!(sdp.sdp, "v=0 host-offer");

    call.guest.send(&answer("v=0 guest-answer")).await.unwrap();
    let relayed = call.host.recv_type(MessageType::Answer).await.unwrap();
    assert_eq!(relayed.from, Some(call.guest_id.clone()));

    call.guest.send(&candidate("candidate:1 1 udp 1 10.0.0.2 5000 typ host")).await.unwrap();
    let relayed: IceCandidate = call
        .host
        .recv_type(MessageType::IceCandidate)
        .await
        .unwrap()
        .decode()
        .unwrap();
    assert_eq!(relayed.candidate, "candidate:1 1 udp 1 10.0.0.2 5000 typ host");
}

#[tokio::test]
async fn test_malformed_frames_keep_the_socket_open() {
    init_tracing();
    let server = TestServer::start().await.unwrap();
    let mut call = connect_pair(&server).await.unwrap();

    call.host.send_raw("this is not json").await.unwrap();
    call.host.send_raw(r#"{"type":"teleport"}"#).await.unwrap();
    call.host.send_raw(r#"{"data":{}}"#).await.unwrap();
    call.host.send(&offer("still-alive")).await.unwrap();

    let relayed = call.guest.recv_type(MessageType::Offer).await.unwrap();
    let sdp: SessionDescription = relayed.decode().unwrap();
    assert_eq!(sdp.sdp, "still-alive");
}

#[tokio::test]
async fn test_leave_ends_call_for_both_sides() {
    init_tracing();
    let server = TestServer::start().await.unwrap();
    let mut call = connect_pair(&server).await.unwrap();

    call.guest
        .send(&tandem_core::Envelope::bare(MessageType::Leave))
        .await
        .unwrap();

    let leave = call.host.recv_type(MessageType::Leave).await.unwrap();
    assert_eq!(leave.from, Some(call.guest_id.clone()));
    let state: StatePayload = call
        .host
        .recv_type(MessageType::State)
        .await
        .unwrap()
        .decode()
        .unwrap();
    assert_eq!(state.status, CallStatus::Ended);

    call.host.expect_closed().await.unwrap();
    call.guest.expect_closed().await.unwrap();

    let response = server
        .http()
        .post(format!("{}/calls/{}/join", server.base_url, call.call_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::GONE);
}

#[tokio::test]
async fn test_http_leave_closes_sockets() {
    init_tracing();
    let server = TestServer::start().await.unwrap();
    let mut call = connect_pair(&server).await.unwrap();

    let response = server
        .http()
        .post(format!("{}/calls/{}/leave", server.base_url, call.call_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);

    wait_for_state(&mut call.guest, CallStatus::Ended, 2).await.unwrap();
    call.guest.expect_closed().await.unwrap();
}
