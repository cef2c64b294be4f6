use crate::app::AppState;
use crate::error::CallError;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use tandem_core::{
    CallId, CallSnapshot, CreateCallResponse, HealthResponse, JoinCallRequest, JoinCallResponse,
    TurnConfigResponse,
};

pub async fn create_call(State(state): State<AppState>) -> (StatusCode, Json<CreateCallResponse>) {
    (StatusCode::CREATED, Json(state.store.create_call()))
}

pub async fn get_call(
    State(state): State<AppState>,
    Path(call_id): Path<CallId>,
) -> Result<Json<CallSnapshot>, CallError> {
    state.store.snapshot(&call_id).await.map(Json)
}

pub async fn join_call(
    State(state): State<AppState>,
    Path(call_id): Path<CallId>,
    body: Option<Json<JoinCallRequest>>,
) -> Result<Json<JoinCallResponse>, CallError> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    state
        .store
        .join_call(&call_id, request.peer_id)
        .await
        .map(Json)
}

pub async fn leave_call(
    State(state): State<AppState>,
    Path(call_id): Path<CallId>,
    body: Option<Json<JoinCallRequest>>,
) -> Result<StatusCode, CallError> {
    let by = body.and_then(|Json(b)| b.peer_id);
    state.store.hangup(&call_id, by).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn turn_config(State(state): State<AppState>) -> Json<TurnConfigResponse> {
    Json(TurnConfigResponse {
        ice_servers: state.ice.ice_servers().await,
    })
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_owned(),
        calls: state.store.len(),
    })
}
