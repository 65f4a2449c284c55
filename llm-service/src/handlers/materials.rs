use super::envelope;
use crate::models::{MaterialRequest, Response};
use crate::services::MaterialInput;
use crate::startup::AppState;
use axum::{
    body::to_bytes,
    extract::{FromRequest, Multipart, Path, Request, State},
    http::header,
};
use validator::Validate;

/// Upper bound on an uploaded material.
pub const MAX_MATERIAL_BYTES: usize = 32 * 1024 * 1024;

/// Accepts the material as raw bytes, `text/plain`, a JSON
/// [`MaterialRequest`] or the first field of a multipart form.
#[tracing::instrument(skip(state, request))]
pub async fn read_material(
    State(state): State<AppState>,
    request: Request,
) -> axum::response::Response {
    let input = match extract_material(&state, request).await {
        Ok(input) => input,
        Err(message) => return envelope(Response::<String>::fail(400, message)),
    };

    envelope(state.gateway.read_material(input).await)
}

#[tracing::instrument(skip(state))]
pub async fn read_next_chunk(
    State(state): State<AppState>,
    Path(material_id): Path<String>,
) -> axum::response::Response {
    envelope(state.gateway.read_next_chunk(&material_id).await)
}

async fn extract_material(state: &AppState, request: Request) -> Result<MaterialInput, String> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_ascii_lowercase();

    if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, state)
            .await
            .map_err(|e| e.body_text())?;
        let field = multipart
            .next_field()
            .await
            .map_err(|e| format!("Failed to read multipart field: {}", e))?
            .ok_or_else(|| "Multipart form has no fields".to_string())?;

        let is_file = field.file_name().is_some();
        let data = field
            .bytes()
            .await
            .map_err(|e| format!("Failed to read multipart field: {}", e))?;

        return Ok(if is_file {
            MaterialInput::Bytes(data.to_vec())
        } else {
            MaterialInput::from_text(String::from_utf8_lossy(&data))
        });
    }

    let body = to_bytes(request.into_body(), MAX_MATERIAL_BYTES)
        .await
        .map_err(|e| format!("Failed to read request body: {}", e))?;

    if content_type.starts_with("application/json") {
        let material: MaterialRequest = serde_json::from_slice(&body)
            .map_err(|e| format!("Invalid material request: {}", e))?;
        material.validate().map_err(|e| e.to_string())?;

        return match (material.text, material.uri) {
            (Some(text), None) => Ok(MaterialInput::Text(text)),
            (None, Some(uri)) => match MaterialInput::from_text(uri) {
                file @ MaterialInput::File(_) => Ok(file),
                _ => Err("Only file:// references are supported".to_string()),
            },
            _ => Err("Provide exactly one of 'text' or 'uri'".to_string()),
        };
    }

    if content_type.starts_with("text/") {
        return Ok(MaterialInput::from_text(String::from_utf8_lossy(&body)));
    }

    Ok(MaterialInput::Bytes(body.to_vec()))
}
