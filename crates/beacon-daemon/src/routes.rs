//! Axum router and all HTTP handlers for beacon-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Handlers are thin: parse, call the engine, map the
//! result. All state changes go through [`PresenceEngine`].
//!
//! [`PresenceEngine`]: beacon_engine::PresenceEngine

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use beacon_engine::{EngineError, ScanInput};
use beacon_gate::{hours_ago, CallerRole, DenyReason};
use beacon_schemas::{AuditKind, NewSubject, Status, SubjectId};
use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::{
    api_types::{
        AuditQuery, ClearedResponse, CreatedSubjectResponse, ErrorResponse, GateRefusedResponse,
        HealthResponse, RemoveSubjectQuery, ScanValidityResponse, StatusChangeRequest,
        SubjectEventRequest,
    },
    state::{uptime_secs, AppState, BusMsg},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/scans", post(scan))
        .route("/v1/subjects", get(roster).post(register_subject))
        .route("/v1/subjects/:id", axum::routing::delete(remove_subject))
        .route("/v1/subjects/:id/events", post(subject_event))
        .route(
            "/v1/subjects/:id/status",
            get(get_status).post(change_status),
        )
        .route("/v1/subjects/:id/scan-validity", get(scan_validity))
        .route("/v1/audit", get(recent_audit))
        .route("/v1/status-counts", get(status_counts))
        .route(
            "/v1/unregistered",
            get(unregistered).delete(clear_unregistered),
        )
        .route("/v1/sweep/run", post(sweep_run))
        .route("/v1/stream", get(stream))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Engine error rendered as an HTTP response.
pub(crate) struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        if let EngineError::GateDenied(reason) = &err {
            return gate_refused(reason);
        }
        let status = match &err {
            EngineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::ConcurrencyConflict(_) => StatusCode::CONFLICT,
            EngineError::Storage(_) | EngineError::Snapshot(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::GateDenied(_) => StatusCode::FORBIDDEN,
        };
        (
            status,
            Json(ErrorResponse {
                error: err.to_string(),
                code: err.code().to_string(),
                retryable: err.is_retryable(),
            }),
        )
            .into_response()
    }
}

fn gate_refused(reason: &DenyReason) -> Response {
    let elapsed_secs = reason.elapsed_secs();
    (
        StatusCode::FORBIDDEN,
        Json(GateRefusedResponse {
            error: format!("GATE_REFUSED: {reason}"),
            gate: reason.code().to_string(),
            elapsed_secs,
            hours_ago: elapsed_secs.map(hours_ago),
        }),
    )
        .into_response()
}

/// 403 for operator-only routes called without the privileged credential.
fn privileged_required(route: &str) -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(GateRefusedResponse {
            error: format!("GATE_REFUSED: {route} requires the privileged caller"),
            gate: "privileged_caller".to_string(),
            elapsed_secs: None,
            hours_ago: None,
        }),
    )
        .into_response()
}

fn bad_request(msg: impl Into<String>) -> ApiError {
    ApiError(EngineError::InvalidInput(msg.into()))
}

fn is_privileged(st: &AppState, headers: &HeaderMap) -> bool {
    st.auth.role_for(headers) == CallerRole::Privileged
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
            store: st.engine.store_backend().to_string(),
            uptime_secs: uptime_secs(),
            privileged_auth: st.auth.is_enabled(),
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /v1/scans
// ---------------------------------------------------------------------------

/// Both registered and unregistered tokens answer 200; the outcome says which.
pub(crate) async fn scan(
    State(st): State<Arc<AppState>>,
    Json(input): Json<ScanInput>,
) -> Result<Response, ApiError> {
    let outcome = st.engine.accept(input).await?;
    Ok((StatusCode::OK, Json(outcome)).into_response())
}

// ---------------------------------------------------------------------------
// /v1/subjects
// ---------------------------------------------------------------------------

pub(crate) async fn roster(State(st): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let entries = st.engine.roster().await?;
    Ok((StatusCode::OK, Json(entries)).into_response())
}

pub(crate) async fn register_subject(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(new): Json<NewSubject>,
) -> Result<Response, ApiError> {
    if !is_privileged(&st, &headers) {
        return Ok(privileged_required("POST /v1/subjects"));
    }
    let created = st.engine.register_subject(new).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedSubjectResponse {
            subject: created.subject,
            status: created.record,
            audit: created.audit,
        }),
    )
        .into_response())
}

pub(crate) async fn remove_subject(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<SubjectId>,
    Query(q): Query<RemoveSubjectQuery>,
) -> Result<Response, ApiError> {
    if !is_privileged(&st, &headers) {
        return Ok(privileged_required("DELETE /v1/subjects/:id"));
    }
    let detail = q.detail.unwrap_or_default();
    let entry = st.engine.remove_subject(id, &detail).await?;
    Ok((StatusCode::OK, Json(entry)).into_response())
}

pub(crate) async fn subject_event(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<SubjectId>,
    Json(req): Json<SubjectEventRequest>,
) -> Result<Response, ApiError> {
    if !is_privileged(&st, &headers) {
        return Ok(privileged_required("POST /v1/subjects/:id/events"));
    }
    let kind = AuditKind::parse(req.kind.trim())
        .ok_or_else(|| bad_request(format!("unknown event kind: {}", req.kind)))?;
    let entry = st.engine.record_subject_event(id, kind, &req.detail).await?;
    Ok((StatusCode::OK, Json(entry)).into_response())
}

// ---------------------------------------------------------------------------
// /v1/subjects/:id/status
// ---------------------------------------------------------------------------

pub(crate) async fn get_status(
    State(st): State<Arc<AppState>>,
    Path(id): Path<SubjectId>,
) -> Result<Response, ApiError> {
    let record = st.engine.get_status(id).await?;
    Ok((StatusCode::OK, Json(record)).into_response())
}

/// Gated transition. Denials answer 403 with the elapsed time since the
/// last scan so the client can explain the refusal.
pub(crate) async fn change_status(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<SubjectId>,
    Json(req): Json<StatusChangeRequest>,
) -> Result<Response, ApiError> {
    let requested = Status::parse(&req.requested_status)
        .ok_or_else(|| bad_request(format!("unknown status: {}", req.requested_status)))?;
    let role = st.auth.role_for(&headers);
    let record = st
        .engine
        .request_status(id, requested, role, req.bypass)
        .await?;
    Ok((StatusCode::OK, Json(record)).into_response())
}

pub(crate) async fn scan_validity(
    State(st): State<Arc<AppState>>,
    Path(id): Path<SubjectId>,
) -> Result<Response, ApiError> {
    let v = st.engine.get_scan_validity(id).await?;
    Ok((StatusCode::OK, Json(ScanValidityResponse::from(v))).into_response())
}

// ---------------------------------------------------------------------------
// Poll feeds
// ---------------------------------------------------------------------------

pub(crate) async fn recent_audit(
    State(st): State<Arc<AppState>>,
    Query(q): Query<AuditQuery>,
) -> Result<Response, ApiError> {
    let entries = st.engine.get_recent_audit(q.limit).await?;
    Ok((StatusCode::OK, Json(entries)).into_response())
}

pub(crate) async fn status_counts(State(st): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let counts = st.engine.status_counts().await?;
    Ok((StatusCode::OK, Json(counts)).into_response())
}

pub(crate) async fn unregistered(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let snap = st.engine.unregistered_snapshot();
    (StatusCode::OK, Json(snap.as_ref().clone()))
}

pub(crate) async fn clear_unregistered(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if !is_privileged(&st, &headers) {
        return Ok(privileged_required("DELETE /v1/unregistered"));
    }
    let removed = st.engine.clear_unregistered().await?;
    st.notify("INFO", format!("unregistered buffer cleared ({removed})"));
    Ok((StatusCode::OK, Json(ClearedResponse { removed })).into_response())
}

// ---------------------------------------------------------------------------
// POST /v1/sweep/run
// ---------------------------------------------------------------------------

pub(crate) async fn sweep_run(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if !is_privileged(&st, &headers) {
        return Ok(privileged_required("POST /v1/sweep/run"));
    }
    let report = st.engine.sweep_now().await?;
    info!(set_offline = report.set_offline, "sweep/run");
    st.notify(
        "WARN",
        format!("manual sweep set {} subject(s) offline", report.set_offline),
    );
    Ok((StatusCode::OK, Json(report)).into_response())
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(m.event_name()).data(data)))
            }
            Err(_) => None, // lagged
        }
    })
}
