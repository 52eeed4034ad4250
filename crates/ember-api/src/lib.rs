//! ember-api — the scaler's inbound RPC surface.
//!
//! axum route handlers mapping the Assign/Idle wire schema onto the
//! per-application scalers held by a `ScalerManager`.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/assign` | Get an instance for a pending invocation |
//! | POST | `/api/v1/idle` | Return an instance after an invocation |
//! | GET | `/api/v1/apps/{key}/stats` | Instance counts + estimator snapshot |
//! | GET | `/healthz` | Liveness probe |

pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;

use ember_core::ScalerConfig;
use ember_scaler::ScalerManager;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<ScalerManager>,
    /// How long an Assign call may block waiting for an instance.
    pub assign_timeout: Duration,
}

/// Build the API router for a manager.
pub fn build_router(manager: Arc<ScalerManager>, config: &ScalerConfig) -> Router {
    let state = ApiState {
        manager,
        assign_timeout: config.assign_timeout,
    };

    Router::new()
        .route("/api/v1/assign", post(handlers::assign))
        .route("/api/v1/idle", post(handlers::idle))
        .route("/api/v1/apps/{key}/stats", get(handlers::app_stats))
        .route("/healthz", get(handlers::healthz))
        .with_state(state)
}
