use crate::app::AppState;
use crate::call::CallStore;
use crate::error::CallError;
use crate::signaling::Outbound;
use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tandem_core::{CallId, Envelope, MessageType, PeerId};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub call_id: CallId,
    pub peer_id: PeerId,
}

/// `GET /ws?call_id=..&peer_id=..`. Unknown calls and strangers are refused
/// before the upgrade so the client sees an HTTP status instead of a dead socket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Result<Response, CallError> {
    state.store.validate(&params.call_id, &params.peer_id).await?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, params, state)))
}

async fn handle_socket(socket: WebSocket, params: WsParams, state: AppState) {
    let WsParams { call_id, peer_id } = params;
    let conn_id = state.next_connection_id();
    info!("New WebSocket connection #{}: {} in {}", conn_id, peer_id, call_id);

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    if let Err(e) = state.store.attach(&call_id, &peer_id, conn_id, tx).await {
        warn!("Refusing socket for {} in {}: {}", peer_id, call_id, e);
        let frame = CloseFrame {
            code: close_code::POLICY,
            reason: e.to_string().into(),
        };
        let _ = sender.send(Message::Close(Some(frame))).await;
        return;
    }

    let heartbeat = state.config.heartbeat_interval;
    let idle_timeout = state.config.heartbeat_timeout;

    let mut send_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat);
        ticker.tick().await;

        loop {
            tokio::select! {
                out = rx.recv() => match out {
                    Some(Outbound::Envelope(envelope)) => {
                        let text = match envelope.to_json() {
                            Ok(text) => text,
                            Err(e) => {
                                error!("Failed to encode {}: {}", envelope.kind, e);
                                continue;
                            }
                        };
                        if sender.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let frame = CloseFrame {
                            code: close_code::NORMAL,
                            reason: "closed by server".into(),
                        };
                        let _ = sender.send(Message::Close(Some(frame))).await;
                        break;
                    }
                },

                _ = ticker.tick() => {
                    if sender.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut recv_task = tokio::spawn({
        let store = state.store.clone();
        let call_id = call_id.clone();
        let peer_id = peer_id.clone();

        async move {
            loop {
                let next = match tokio::time::timeout(idle_timeout, receiver.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!("Heartbeat timeout for {} in {}", peer_id, call_id);
                        break;
                    }
                };
                let Some(Ok(msg)) = next else {
                    break;
                };

                match msg {
                    Message::Text(text) => {
                        handle_text(&store, &call_id, &peer_id, text.as_str()).await
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };

    state.store.mark_disconnected(&call_id, &peer_id, conn_id).await;
    info!("WebSocket #{} disconnected: {} in {}", conn_id, peer_id, call_id);
}

/// Malformed or unexpected frames are logged and dropped; the socket stays open.
async fn handle_text(store: &CallStore, call_id: &CallId, peer_id: &PeerId, text: &str) {
    let envelope = match Envelope::from_json(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Invalid envelope from {}: {}", peer_id, e);
            return;
        }
    };

    match envelope.message_type() {
        Ok(kind) if kind.is_relayed() => store.relay(call_id, peer_id, envelope).await,
        Ok(MessageType::Leave) => {
            if let Err(e) = store.hangup(call_id, Some(peer_id.clone())).await {
                warn!("Leave from {} failed: {}", peer_id, e);
            }
        }
        Ok(kind) => debug!("Ignoring server-originated type {} from {}", kind, peer_id),
        Err(e) => warn!("Dropping envelope from {}: {}", peer_id, e),
    }
}
