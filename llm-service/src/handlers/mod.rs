//! HTTP handlers for the LLM service.

pub mod generation;
pub mod health;
pub mod materials;
pub mod metrics;

pub use generation::{generate_reply, generate_streamed_reply};
pub use health::{health_check, readiness_check};
pub use materials::{read_material, read_next_chunk};
pub use metrics::metrics;

use crate::models::Response;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

/// HTTP status for an envelope: 200 for any success, the envelope code
/// otherwise.
pub fn status_for<T>(response: &Response<T>) -> StatusCode {
    if response.is_success {
        StatusCode::OK
    } else {
        StatusCode::from_u16(response.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// Render an envelope as a JSON response carrying its status.
pub fn envelope<T: Serialize>(response: Response<T>) -> axum::response::Response {
    (status_for(&response), Json(response)).into_response()
}
