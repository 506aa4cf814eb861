//! Loopback API the observer drives the agent through.
//!
//! Four endpoints, all behind the shared internal key: `/state`, `/birth`,
//! `/force-sync`, `/budget`. Bound to loopback only; the public never
//! reaches this surface.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use vivarium_core::{BirthPayload, ErrorBody, ErrorKind, ForceSyncPayload};

use crate::runtime::Runtime;

#[derive(Clone)]
pub struct ServerState {
    pub runtime: Arc<Runtime>,
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/state", get(get_state))
        .route("/birth", post(post_birth))
        .route("/force-sync", post(post_force_sync))
        .route("/budget", get(get_budget))
        .with_state(state)
}

fn check_key(state: &ServerState, headers: &HeaderMap) -> Result<(), Response> {
    let provided = headers
        .get("x-internal-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim);
    if provided == Some(state.runtime.config.internal_api_key.as_str()) {
        Ok(())
    } else {
        Err((
            StatusCode::FORBIDDEN,
            Json(ErrorBody::new(ErrorKind::Auth, "unauthorized")),
        )
            .into_response())
    }
}

async fn get_state(State(state): State<ServerState>, headers: HeaderMap) -> Response {
    if let Err(denied) = check_key(&state, &headers) {
        return denied;
    }
    Json(state.runtime.state_report()).into_response()
}

async fn get_budget(State(state): State<ServerState>, headers: HeaderMap) -> Response {
    if let Err(denied) = check_key(&state, &headers) {
        return denied;
    }
    Json(state.runtime.budget_report()).into_response()
}

async fn post_birth(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(payload): Json<BirthPayload>,
) -> Response {
    if let Err(denied) = check_key(&state, &headers) {
        return denied;
    }
    match state.runtime.apply_birth(payload) {
        Ok(fresh) => Json(serde_json::json!({ "ok": true, "fresh": fresh })).into_response(),
        Err(message) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody::new(ErrorKind::Validation, message)),
        )
            .into_response(),
    }
}

async fn post_force_sync(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(payload): Json<ForceSyncPayload>,
) -> Response {
    if let Err(denied) = check_key(&state, &headers) {
        return denied;
    }
    state.runtime.apply_force_sync(payload);
    Json(serde_json::json!({ "ok": true })).into_response()
}
