//! Axum router for the watchdog's operator surface.
//!
//! `build_router` returns the bare router; `main.rs` adds middleware so the
//! scenario tests can drive it with `oneshot`.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tg_audit::AuditEventType;
use tg_db::AuditQuery;

use crate::api_types::{
    AuditResponse, EmergencyStopRequest, ErrorResponse, HealthResponse, OperatorRequest,
    ResetBreakerRequest, StatusResponse, TransitionResponse,
};
use crate::watchdog::Watchdog;

const AUDIT_DEFAULT_LIMIT: i64 = 100;
const AUDIT_MAX_LIMIT: i64 = 1_000;

pub struct AppState {
    pub watchdog: Arc<Watchdog>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/circuit-breaker/reset", post(reset_breaker))
        .route("/v1/emergency-stop", post(emergency_stop))
        .route("/v1/emergency-stop/clear", post(clear_emergency_stop))
        .route("/v1/audit", get(audit_query))
        .route("/v1/audit/verify", get(audit_verify))
        .with_state(state)
}

fn bad_request(msg: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: msg.into() })).into_response()
}

fn internal(e: anyhow::Error) -> Response {
    tracing::error!(error = %format!("{e:#}"), "operator request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: format!("{e:#}"),
        }),
    )
        .into_response()
}

fn operator_name(raw: &str) -> Result<&str, Response> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(bad_request("operator is required"));
    }
    Ok(name)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: "tg-watchdog".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> Response {
    match status(&st).await {
        Ok(s) => (StatusCode::OK, Json(s)).into_response(),
        Err(e) => internal(e),
    }
}

async fn status(st: &AppState) -> anyhow::Result<StatusResponse> {
    let pool = st.watchdog.pool();
    let risk_state = tg_db::load_risk_state(pool).await?;
    let heartbeat = tg_db::read_heartbeat(pool).await?;
    Ok(StatusResponse {
        breaker_state: risk_state.breaker_state(),
        halted: risk_state.is_halted(),
        heartbeat_age_ms: heartbeat.as_ref().map(|h| h.age_ms(Utc::now())),
        heartbeat,
        needs_review_trades: tg_db::needs_review_count(pool).await?,
        flatten_pending: st.watchdog.flatten_pending().await,
        last_poll: st.watchdog.last_poll().await,
        risk_state,
    })
}

// ---------------------------------------------------------------------------
// POST /v1/circuit-breaker/reset
// ---------------------------------------------------------------------------

pub(crate) async fn reset_breaker(
    State(st): State<Arc<AppState>>,
    Json(req): Json<ResetBreakerRequest>,
) -> Response {
    let operator = match operator_name(&req.operator) {
        Ok(o) => o,
        Err(r) => return r,
    };

    let rebase = if req.rebase {
        match st.watchdog.account_value().await {
            Ok(v) => Some(v),
            Err(e) => {
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(ErrorResponse {
                        error: format!("cannot rebase drawdown baseline: {e}"),
                    }),
                )
                    .into_response()
            }
        }
    } else {
        None
    };

    let pool = st.watchdog.pool();
    let changed = match tg_db::reset_circuit_breaker(pool, operator, Utc::now(), rebase).await {
        Ok(c) => c,
        Err(e) => return internal(e),
    };
    tracing::warn!(operator, changed, rebase = ?rebase, "circuit breaker reset requested");
    transition_response(pool, changed).await
}

// ---------------------------------------------------------------------------
// POST /v1/emergency-stop  /v1/emergency-stop/clear
// ---------------------------------------------------------------------------

pub(crate) async fn emergency_stop(
    State(st): State<Arc<AppState>>,
    Json(req): Json<EmergencyStopRequest>,
) -> Response {
    let operator = match operator_name(&req.operator) {
        Ok(o) => o,
        Err(r) => return r,
    };
    if req.reason.trim().is_empty() {
        return bad_request("reason is required");
    }

    let pool = st.watchdog.pool();
    let actor = format!("operator:{operator}");
    let changed = match tg_db::set_emergency_stop(pool, Utc::now(), req.reason.trim(), &actor).await
    {
        Ok(c) => c,
        Err(e) => return internal(e),
    };
    if req.flatten {
        st.watchdog
            .request_flatten(format!("operator {operator}: {}", req.reason.trim()))
            .await;
    }
    tracing::error!(operator, changed, flatten = req.flatten, "emergency stop set by operator");
    transition_response(pool, changed).await
}

pub(crate) async fn clear_emergency_stop(
    State(st): State<Arc<AppState>>,
    Json(req): Json<OperatorRequest>,
) -> Response {
    let operator = match operator_name(&req.operator) {
        Ok(o) => o,
        Err(r) => return r,
    };
    let pool = st.watchdog.pool();
    let changed = match tg_db::clear_emergency_stop(pool, operator, Utc::now()).await {
        Ok(c) => c,
        Err(e) => return internal(e),
    };
    tracing::warn!(operator, changed, "emergency stop cleared");
    transition_response(pool, changed).await
}

async fn transition_response(pool: &sqlx::SqlitePool, changed: bool) -> Response {
    match tg_db::load_risk_state(pool).await {
        Ok(risk_state) => (
            StatusCode::OK,
            Json(TransitionResponse {
                changed,
                risk_state,
            }),
        )
            .into_response(),
        Err(e) => internal(e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/audit  /v1/audit/verify
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AuditParams {
    trade_id: Option<String>,
    event_type: Option<String>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    limit: Option<i64>,
}

pub(crate) async fn audit_query(
    State(st): State<Arc<AppState>>,
    Query(p): Query<AuditParams>,
) -> Response {
    let event_type = match p.event_type.as_deref() {
        None => None,
        Some(s) => match AuditEventType::parse(s) {
            Some(t) => Some(t),
            None => return bad_request(format!("unknown event_type: {s}")),
        },
    };
    let q = AuditQuery {
        trade_id: p.trade_id,
        event_type,
        since: p.since,
        until: p.until,
        limit: Some(p.limit.unwrap_or(AUDIT_DEFAULT_LIMIT).clamp(0, AUDIT_MAX_LIMIT)),
    };
    match tg_db::query_audit_events(st.watchdog.pool(), &q).await {
        Ok(events) => (StatusCode::OK, Json(AuditResponse { events })).into_response(),
        Err(e) => internal(e),
    }
}

pub(crate) async fn audit_verify(State(st): State<Arc<AppState>>) -> Response {
    match tg_db::verify_audit_chain(st.watchdog.pool()).await {
        Ok(tg_audit::VerifyResult::Valid { events }) => (
            StatusCode::OK,
            Json(serde_json::json!({ "valid": true, "events": events })),
        )
            .into_response(),
        Ok(tg_audit::VerifyResult::Broken { seq, reason }) => (
            StatusCode::OK,
            Json(serde_json::json!({ "valid": false, "seq": seq, "reason": reason })),
        )
            .into_response(),
        Err(e) => internal(e),
    }
}
