// 🌐 HTTP API - Xtrack integration info + manual update trigger
//
// GET  /api/health         - liveness
// GET  /api/xtrack_info    - store summary + provider URL
// POST /api/xtrack_update  - start one background sync of every kind

use crate::db::{Store, StoreSummary};
use crate::error::ReconcileError;
use crate::source::RecordSource;
use crate::sync::SyncService;
use crate::temporal::start_of_local_day;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Local;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

/// Shared application state
pub struct AppState<S> {
    pub sync: Arc<SyncService<S>>,
}

// derive(Clone) would demand S: Clone
impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        AppState {
            sync: Arc::clone(&self.sync),
        }
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self { success: true, data }
    }
}

#[derive(Serialize)]
struct InfoResponse {
    xtrack_url: String,
    #[serde(flatten)]
    summary: StoreSummary,
}

pub fn build_router<S: RecordSource>(state: AppState<S>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/xtrack_info", get(xtrack_info::<S>))
        .route("/api/xtrack_update", post(xtrack_update::<S>))
        .with_state(state)
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok(json!({ "status": "OK", "version": crate::VERSION })))
}

/// GET /api/xtrack_info - Counts over current state
async fn xtrack_info<S: RecordSource>(State(state): State<AppState<S>>) -> Response {
    let Some(store) = state.sync.reconciler().store().cloned() else {
        return error_response(ReconcileError::StoreUnavailable.to_string());
    };

    let since = start_of_local_day(Local::now());
    match tokio::task::spawn_blocking(move || store.summary(since)).await {
        Ok(Ok(summary)) => Json(InfoResponse {
            xtrack_url: state.sync.source().base_url().to_string(),
            summary,
        })
        .into_response(),
        Ok(Err(e)) => {
            error!(error = %format!("{e:#}"), "error getting Xtrack info");
            error_response(format!("{e:#}"))
        }
        Err(e) => {
            error!(error = %e, "summary task aborted");
            error_response(e.to_string())
        }
    }
}

/// POST /api/xtrack_update - Fire and forget
async fn xtrack_update<S: RecordSource>(State(state): State<AppState<S>>) -> impl IntoResponse {
    state.sync.trigger();
    Json(json!({ "status": "update triggered" }))
}

fn error_response(message: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "status": "error", "message": message })),
    )
        .into_response()
}
