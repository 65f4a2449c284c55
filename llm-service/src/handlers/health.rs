use crate::startup::AppState;
use axum::{extract::State, response::IntoResponse, Json};
use service_core::error::AppError;
use serde_json::json;

/// Liveness probe.
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "llm-service",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Readiness probe: the configured provider must report healthy.
pub async fn readiness_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let provider = state.gateway.provider();
    provider.health_check().await.map_err(|e| {
        tracing::warn!(error = %e, provider = provider.name(), "Provider not ready");
        AppError::Unavailable(e.to_string())
    })?;

    Ok(Json(json!({
        "status": "ready",
        "provider": provider.name(),
        "model": provider.model()
    })))
}
