use super::{envelope, status_for};
use crate::models::{GenerationRequest, Response};
use crate::startup::AppState;
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use validator::Validate;

const MAX_REQUEST_ID_LEN: usize = 128;

fn parse_request(
    body: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<GenerationRequest, Response<()>> {
    let Json(request) = body.map_err(|e| Response::fail(400, e.body_text()))?;
    request
        .validate()
        .map_err(|e| Response::fail(400, e.to_string()))?;
    Ok(request)
}

#[tracing::instrument(skip(state, body))]
pub async fn generate_reply(
    State(state): State<AppState>,
    body: Result<Json<GenerationRequest>, JsonRejection>,
) -> axum::response::Response {
    let request = match parse_request(body) {
        Ok(request) => request,
        Err(rejected) => return envelope(rejected.cast::<String>()),
    };

    envelope(state.gateway.generate_reply(&request.context).await)
}

/// Streams the reply as `text/markdown`. Failures to start answer with a
/// plain-text body and the matching status.
#[tracing::instrument(skip(state, body))]
pub async fn generate_streamed_reply(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    body: Result<Json<GenerationRequest>, JsonRejection>,
) -> axum::response::Response {
    if request_id.is_empty() || request_id.chars().count() > MAX_REQUEST_ID_LEN {
        return plain_failure(Response::fail(
            400,
            format!("Request id must be 1 to {} characters", MAX_REQUEST_ID_LEN),
        ));
    }

    let request = match parse_request(body) {
        Ok(request) => request,
        Err(rejected) => return plain_failure(rejected),
    };

    let response = state
        .gateway
        .generate_streamed_reply(&request_id, &request.context)
        .await;

    if !response.is_success {
        return plain_failure(response.cast());
    }

    match response.payload {
        Some(relay) => (
            [
                (header::CONTENT_TYPE, "text/markdown; charset=utf-8"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            Body::from_stream(relay),
        )
            .into_response(),
        None => {
            tracing::error!("Streamed reply succeeded without a stream");
            plain_failure(Response::fail(500, "Stream missing"))
        }
    }
}

fn plain_failure(response: Response<()>) -> axum::response::Response {
    let status = match status_for(&response) {
        StatusCode::OK => StatusCode::INTERNAL_SERVER_ERROR,
        status => status,
    };
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        response.message,
    )
        .into_response()
}
