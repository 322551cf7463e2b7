//! HTTP request handlers

use super::types::{ErrorResponse, HealthResponse, StatsResponse};
use super::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::trace::TraceLayer;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/version", get(get_version))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, AppError> {
    let ledger = state
        .ledger
        .stats()
        .await
        .map_err(|e| AppError::Unavailable(e.to_string()))?;
    let active_sessions = state
        .sessions
        .active_count()
        .await
        .map_err(|e| AppError::Unavailable(e.to_string()))?;
    Ok(Json(StatsResponse {
        ledger,
        active_sessions,
    }))
}

async fn get_version() -> &'static str {
    concat!("adslot-broker ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    Unavailable(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Unavailable(msg) => {
                tracing::warn!(error = %msg, "Stats unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, msg)
            }
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
