//! Public, admin, and internal HTTP surfaces of the observer.
//!
//! Every handler catches at the boundary: clients get the uniform
//! `{error, kind, message}` envelope with a generic message, the log gets the
//! detail. Admin endpoints accept either a local-network peer or the admin
//! bearer token; internal endpoints require the shared key.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;

use vivarium_core::{
    resolve_client_ip, voter_fingerprint, ActivityEvent, ErrorBody, ErrorKind, EventKind,
    ForwardHeaders, OracleKind, SecretScanner, VoteChoice, VoteRejection,
};

use crate::lifecycle::Lifecycle;
use crate::voting::VoteService;

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<Lifecycle>,
    pub votes: Arc<VoteService>,
    pub events_tx: broadcast::Sender<ActivityEvent>,
    pub scanner: Arc<SecretScanner>,
}

/// Boundary error: taxonomy kind plus a client-safe message.
pub struct ApiError {
    kind: ErrorKind,
    message: String,
}

impl ApiError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn internal(err: impl std::fmt::Display) -> Self {
        tracing::error!(target: "vivarium::http", error = %err, "internal error");
        Self::new(ErrorKind::Internal, "internal error")
    }
}

impl From<crate::store::StoreError> for ApiError {
    fn from(err: crate::store::StoreError) -> Self {
        Self::internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.kind.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorBody::new(self.kind, self.message))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/state", get(public_state))
        .route("/api/votes", get(vote_counts))
        .route("/api/vote/:choice", post(cast_vote))
        .route("/api/activity", get(recent_activity))
        .route("/api/stream/activity", get(stream_activity))
        .route("/api/kill", post(admin_kill))
        .route("/api/respawn", post(admin_respawn))
        .route("/api/force-alive", post(admin_force_alive))
        .route("/api/god/votes/adjust", post(admin_adjust_votes))
        .route("/api/god/oracle", post(admin_oracle))
        .route("/api/internal/activity", post(internal_activity))
        .route("/api/internal/heartbeat", post(internal_heartbeat))
        .route("/api/internal/identity", post(internal_identity))
        .route("/api/internal/oracle/pending", get(internal_oracle_pending))
        .route("/api/internal/oracle/ack", post(internal_oracle_ack))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Auth guards
// ---------------------------------------------------------------------------

fn is_local(state: &AppState, peer: SocketAddr) -> bool {
    peer.ip().is_loopback() || state.lifecycle.config().local_network.contains(peer.ip())
}

fn require_admin(state: &AppState, peer: SocketAddr, headers: &HeaderMap) -> Result<(), ApiError> {
    if is_local(state, peer) {
        return Ok(());
    }
    let provided = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim);
    if provided == Some(state.lifecycle.config().admin_token.as_str()) {
        Ok(())
    } else {
        Err(ApiError::new(ErrorKind::Auth, "unauthorized"))
    }
}

fn require_internal(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let provided = headers
        .get("x-internal-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim);
    if provided == Some(state.lifecycle.config().internal_api_key.as_str()) {
        Ok(())
    } else {
        Err(ApiError::new(ErrorKind::Auth, "unauthorized"))
    }
}

fn forward_headers(headers: &HeaderMap) -> ForwardHeaders {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    ForwardHeaders {
        cf_connecting_ip: get("cf-connecting-ip"),
        x_forwarded_for: get("x-forwarded-for"),
        x_real_ip: get("x-real-ip"),
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

async fn public_state(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let life = state.lifecycle.store().life_state()?;
    let counts = state.votes.counts()?;
    // Balance is display here; the poller owns the bankruptcy decision.
    let balance = match state.lifecycle.agent().budget().await {
        Ok(report) => Some(report.balance_usd),
        Err(_) => None,
    };
    Ok(Json(serde_json::json!({
        "life_number": if life.is_alive { Some(life.life_number) } else { None },
        "is_alive": life.is_alive,
        "born_at": life.born_at,
        "model": life.model,
        "votes": { "live": counts.live, "die": counts.die },
        "balance_usd": balance,
    })))
}

async fn vote_counts(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let counts = state.votes.counts()?;
    Ok(Json(serde_json::json!({
        "live": counts.live,
        "die": counts.die,
        "total": counts.total,
    })))
}

async fn cast_vote(
    State(state): State<AppState>,
    Path(choice): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let Some(choice) = VoteChoice::parse(&choice) else {
        return Err(ApiError::new(ErrorKind::Validation, "vote must be 'live' or 'die'"));
    };

    let config = state.lifecycle.config();
    let client_ip = resolve_client_ip(peer.ip(), &forward_headers(&headers), &config.trusted_proxies);
    let fingerprint = voter_fingerprint(&config.ip_salt, &client_ip);

    match state.votes.submit(&fingerprint, choice)? {
        Ok(counts) => {
            state.lifecycle.emit(
                state.lifecycle.store().life_state()?.life_number,
                EventKind::Act,
                &format!("a visitor voted to {}", choice.as_str()),
            );
            Ok(Json(serde_json::json!({
                "ok": true,
                "votes": { "live": counts.live, "die": counts.die, "total": counts.total },
            }))
            .into_response())
        }
        Err(rejection) => {
            let status = StatusCode::from_u16(rejection.error_kind().status_code())
                .unwrap_or(StatusCode::BAD_REQUEST);
            let (label, retry) = match &rejection {
                VoteRejection::Cooldown { retry_after_s } => ("cooldown", Some(*retry_after_s)),
                VoteRejection::Duplicate => ("duplicate", None),
                VoteRejection::Dead => ("dead", None),
            };
            Ok((
                status,
                Json(serde_json::json!({
                    "ok": false,
                    "error": label,
                    "retry_after_s": retry,
                })),
            )
                .into_response())
        }
    }
}

#[derive(Deserialize)]
struct LimitQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

async fn recent_activity(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<ActivityEvent>>, ApiError> {
    let events = state
        .lifecycle
        .store()
        .recent_activity(query.limit.min(500))?;
    Ok(Json(events))
}

/// SSE activity stream. Replays the recent tail with its monotonic ids, then
/// follows the live broadcast; consumers track ids to dedupe on reconnect.
async fn stream_activity(
    State(state): State<AppState>,
) -> Sse<impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>> + Send + 'static>
{
    use async_stream::stream;

    let backlog = state.lifecycle.store().recent_activity(20).unwrap_or_default();
    let mut rx = state.events_tx.subscribe();
    let stream = stream! {
        let mut last_seq = 0u64;
        for event in backlog {
            last_seq = event.seq;
            yield Ok(sse_event(&event));
        }
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.seq <= last_seq {
                        continue;
                    }
                    last_seq = event.seq;
                    yield Ok(sse_event(&event));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(target: "vivarium::http", dropped = n, "sse subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

fn sse_event(event: &ActivityEvent) -> Event {
    Event::default()
        .id(event.seq.to_string())
        .event("activity")
        .json_data(event)
        .unwrap_or_else(|_| Event::default().data("{}"))
}

// ---------------------------------------------------------------------------
// Admin API
// ---------------------------------------------------------------------------

#[derive(Deserialize, Default)]
struct KillBody {
    #[serde(default)]
    cause: Option<String>,
}

async fn admin_kill(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Option<Json<KillBody>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&state, peer, &headers)?;
    let note = body
        .and_then(|Json(b)| b.cause)
        .unwrap_or_else(|| "killed by the creator".to_string());
    let killed = state
        .lifecycle
        .begin_death(vivarium_core::DeathCause::Manual, &note)
        .await;
    if killed {
        Ok(Json(serde_json::json!({ "ok": true })))
    } else {
        Err(ApiError::new(ErrorKind::DeadState, "already dead"))
    }
}

async fn admin_respawn(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&state, peer, &headers)?;
    if state.lifecycle.store().life_state()?.is_alive {
        return Err(ApiError::new(ErrorKind::Conflict, "still alive"));
    }
    state.lifecycle.request_respawn();
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn admin_force_alive(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&state, peer, &headers)?;
    match state.lifecycle.force_alive().await {
        Ok(life_number) => Ok(Json(serde_json::json!({ "ok": true, "life_number": life_number }))),
        Err(message) => Err(ApiError::new(ErrorKind::Internal, message)),
    }
}

#[derive(Deserialize)]
struct AdjustVotesBody {
    live: u64,
    die: u64,
}

async fn admin_adjust_votes(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<AdjustVotesBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&state, peer, &headers)?;
    let store = state.lifecycle.store();
    let Some(round) = store.current_open_round()? else {
        return Err(ApiError::new(ErrorKind::NotFound, "no open round"));
    };
    store.adjust_votes(round.id, body.live, body.die)?;
    Ok(Json(serde_json::json!({ "ok": true, "live": body.live, "die": body.die })))
}

#[derive(Deserialize)]
struct OracleBody {
    message: String,
    #[serde(default)]
    kind: Option<String>,
}

async fn admin_oracle(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<OracleBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&state, peer, &headers)?;
    if body.message.trim().is_empty() {
        return Err(ApiError::new(ErrorKind::Validation, "message required"));
    }
    let kind = body
        .kind
        .as_deref()
        .and_then(OracleKind::parse)
        .unwrap_or(OracleKind::Oracle);
    let id = state.lifecycle.store().record_oracle(kind, body.message.trim())?;
    let life = state.lifecycle.store().life_state()?.life_number;
    state
        .lifecycle
        .emit(life, EventKind::Oracle, &format!("the {} spoke", kind.as_str()));
    Ok(Json(serde_json::json!({ "ok": true, "id": id })))
}

// ---------------------------------------------------------------------------
// Internal API (agent-facing)
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ActivityBody {
    kind: String,
    payload: String,
}

async fn internal_activity(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ActivityBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_internal(&state, &headers)?;
    let Some(kind) = EventKind::parse(&body.kind) else {
        return Err(ApiError::new(ErrorKind::Validation, "unknown event kind"));
    };
    // Defense in depth: the agent's guard already redacts, but nothing that
    // looks like a credential may land on the public timeline.
    let (payload, hits) = state.scanner.redact(&body.payload);
    if !hits.is_empty() {
        tracing::warn!(
            target: "vivarium::http",
            hits = hits.len(),
            "secrets scrubbed from reported activity"
        );
    }
    let life = state.lifecycle.store().life_state()?.life_number;
    state.lifecycle.emit(life, kind, &payload);
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Deserialize)]
struct HeartbeatBody {
    #[serde(default)]
    model: Option<String>,
}

async fn internal_heartbeat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<HeartbeatBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_internal(&state, &headers)?;
    state.lifecycle.store().touch_last_seen(body.model.as_deref())?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Deserialize)]
struct IdentityBody {
    life_number: u64,
    name: String,
    #[serde(default)]
    icon: Option<String>,
    #[serde(default)]
    pronoun: Option<String>,
}

async fn internal_identity(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<IdentityBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_internal(&state, &headers)?;
    if body.name.trim().is_empty() {
        return Err(ApiError::new(ErrorKind::Validation, "name required"));
    }
    state.lifecycle.store().record_identity(
        body.life_number,
        body.name.trim(),
        body.icon.as_deref().unwrap_or("🤖"),
        body.pronoun.as_deref().unwrap_or("it"),
    )?;
    state.lifecycle.emit(
        body.life_number,
        EventKind::Birth,
        &format!("life #{} named itself '{}'", body.life_number, body.name.trim()),
    );
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn internal_oracle_pending(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_internal(&state, &headers)?;
    let pending = state.lifecycle.store().pending_oracle()?;
    Ok(Json(serde_json::json!({ "message": pending })))
}

#[derive(Deserialize)]
struct OracleAckBody {
    id: u64,
}

async fn internal_oracle_ack(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<OracleAckBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_internal(&state, &headers)?;
    let acked = state.lifecycle.store().acknowledge_oracle(body.id)?;
    Ok(Json(serde_json::json!({ "ok": acked })))
}
