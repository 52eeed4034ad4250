//! API handlers.
//!
//! Scaler errors map onto HTTP statuses (cancelled → 408, invalid
//! argument → 400, unknown instance/app → 404) and are echoed in-band in
//! the reply's `error_message`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use tracing::debug;

use ember_core::{AssignReply, AssignRequest, IdleReply, IdleRequest, Stats, Status};
use ember_scaler::{RuntimeSnapshot, ScalerError};

use crate::ApiState;

fn error_status(error: &ScalerError) -> StatusCode {
    match error {
        ScalerError::Cancelled(_) => StatusCode::REQUEST_TIMEOUT,
        ScalerError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        ScalerError::NotFound(_) => StatusCode::NOT_FOUND,
    }
}

/// POST /api/v1/assign
pub async fn assign(
    State(state): State<ApiState>,
    Json(request): Json<AssignRequest>,
) -> impl IntoResponse {
    debug!(request_id = %request.request_id, app = %request.meta_data.key, "assign request");
    let scaler = state.manager.scaler_for(&request.meta_data).await;
    let wait_deadline = tokio::time::sleep(state.assign_timeout);

    match scaler.assign(request, wait_deadline).await {
        Ok(reply) => (StatusCode::OK, Json(reply)).into_response(),
        Err(error) => (
            error_status(&error),
            Json(AssignReply {
                status: Status::InternalError,
                assignment: None,
                error_message: Some(error.to_string()),
            }),
        )
            .into_response(),
    }
}

/// POST /api/v1/idle
pub async fn idle(
    State(state): State<ApiState>,
    Json(request): Json<IdleRequest>,
) -> impl IntoResponse {
    let meta_key = match request.assignment.as_ref() {
        Some(assignment) => assignment.meta_key.clone(),
        None => {
            return idle_error(StatusCode::BAD_REQUEST, "assignment is nil");
        }
    };

    let Some(scaler) = state.manager.get(&meta_key).await else {
        return idle_error(StatusCode::NOT_FOUND, &format!("no scaler for app {meta_key}"));
    };

    match scaler.idle(request).await {
        Ok(reply) => (StatusCode::OK, Json(reply)).into_response(),
        Err(error) => idle_error(error_status(&error), &error.to_string()),
    }
}

fn idle_error(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(IdleReply {
            status: Status::InternalError,
            error_message: Some(message.to_string()),
        }),
    )
        .into_response()
}

/// Stats payload: instance counts plus the estimator's view.
#[derive(Serialize)]
pub struct StatsResponse {
    pub app: String,
    pub stats: Stats,
    pub runtime: RuntimeSnapshot,
    /// First observed creation latency in ms, zero until one completes.
    pub creating_duration_ms: u64,
}

/// GET /api/v1/apps/{key}/stats
pub async fn app_stats(
    State(state): State<ApiState>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    let Some(scaler) = state.manager.get(&key).await else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("no scaler for app {key}") })),
        )
            .into_response();
    };

    let response = StatsResponse {
        app: key,
        stats: scaler.stats().await,
        runtime: scaler.runtime_snapshot().await,
        creating_duration_ms: scaler.creating_duration_ms(),
    };
    (StatusCode::OK, Json(response)).into_response()
}

/// GET /healthz
pub async fn healthz(State(state): State<ApiState>) -> impl IntoResponse {
    if state.manager.check_live().await {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    }
}
