//! REST API handlers.
//!
//! Each handler reads via `StateStore` or delegates to the report
//! crate and returns JSON.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use opsmon_report::ReportModel;

use crate::ApiState;

/// Error body, shaped like the report response's `ok` flag.
#[derive(Serialize)]
struct ApiError {
    ok: bool,
    error: String,
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiError {
            ok: false,
            error: msg.to_string(),
        }),
    )
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// GET /config
pub async fn config<M: ReportModel>(State(state): State<ApiState<M>>) -> impl IntoResponse {
    Json(json!({
        "portainer_base_url": state.config.portainer_base_url,
        "proxmox_stats_url": state.config.proxmox.base_url(),
        "interval": state.config.interval().as_secs(),
    }))
}

/// GET /api/registry
pub async fn registry<M: ReportModel>(State(state): State<ApiState<M>>) -> impl IntoResponse {
    Json(json!({
        "defaults": state.registry.defaults,
        "checks": state.registry.normalized(),
        "count": state.registry.checks.len(),
    }))
}

// ── Status ─────────────────────────────────────────────────────

/// GET /api/status/checks
pub async fn status_checks<M: ReportModel>(State(state): State<ApiState<M>>) -> impl IntoResponse {
    Json(state.store.snapshot())
}

/// GET /api/status/summary
pub async fn status_summary<M: ReportModel>(
    State(state): State<ApiState<M>>,
) -> impl IntoResponse {
    Json(state.store.summary())
}

#[derive(Deserialize)]
pub struct EventsQuery {
    #[serde(default = "default_events_limit")]
    pub limit: usize,
}

fn default_events_limit() -> usize {
    50
}

/// GET /api/status/events?limit=50
pub async fn status_events<M: ReportModel>(
    State(state): State<ApiState<M>>,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    Json(state.store.events(query.limit))
}

// ── Ops ────────────────────────────────────────────────────────

/// GET /api/ops/summary
pub async fn ops_summary<M: ReportModel>(State(state): State<ApiState<M>>) -> impl IntoResponse {
    Json(opsmon_report::ops_summary(
        &state.store,
        &state.config,
        Utc::now(),
    ))
}

/// GET /api/ops/health
pub async fn ops_health<M: ReportModel>(State(state): State<ApiState<M>>) -> impl IntoResponse {
    Json(opsmon_report::ops_health(
        &state.store,
        state.config.interval(),
        Utc::now(),
    ))
}

// ── Alerts ─────────────────────────────────────────────────────

/// POST /api/alerts/test/{check_id}
pub async fn alerts_test<M: ReportModel>(
    State(state): State<ApiState<M>>,
    Path(check_id): Path<String>,
) -> impl IntoResponse {
    let Some(notifier) = &state.notifier else {
        return error_response("ntfy is not configured", StatusCode::BAD_REQUEST).into_response();
    };
    let Some(check) = state.registry.find(&check_id) else {
        return error_response(
            &format!("unknown check: {check_id}"),
            StatusCode::NOT_FOUND,
        )
        .into_response();
    };

    let title = format!("[TEST] {}", check.id);
    let message = format!(
        "Test notification for {} ({})\nTarget: {}",
        check.id,
        check.kind(),
        check.target.describe()
    );
    match notifier.send_down(&title, &message).await {
        Ok(()) => {
            info!(check_id = %check.id, "test notification sent");
            Json(json!({"ok": true, "check_id": check.id, "channel": "ntfy"})).into_response()
        }
        Err(e) => {
            warn!(check_id = %check.id, error = %e, "test notification failed");
            error_response(&e.to_string(), StatusCode::BAD_GATEWAY).into_response()
        }
    }
}

// ── Reports ────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ReportRequest {
    #[serde(default = "default_range_minutes")]
    pub range_minutes: u32,
}

fn default_range_minutes() -> u32 {
    1440
}

/// POST /api/reports/generate
pub async fn generate_report<M: ReportModel>(
    State(state): State<ApiState<M>>,
    Json(req): Json<ReportRequest>,
) -> impl IntoResponse {
    if req.range_minutes == 0 {
        return error_response("range_minutes must be at least 1", StatusCode::BAD_REQUEST)
            .into_response();
    }
    let response = state
        .pipeline
        .generate(&state.store, &state.config, req.range_minutes, Utc::now())
        .await;
    Json(response).into_response()
}
