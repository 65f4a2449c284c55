use axum::http::{HeaderMap, HeaderValue};
use axum::{extract::Request, middleware::Next, response::Response};
use tracing::Instrument;
use uuid::Uuid;

use crate::observability::REQUEST_ID_HEADER;

fn incoming_request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty() && s.len() <= 128)
        .map(str::to_string)
}

/// Run the request inside a span keyed by its correlation id. The caller's
/// `x-request-id` is kept when usable, otherwise one is minted; either way
/// it is echoed on the response.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id =
        incoming_request_id(req.headers()).unwrap_or_else(|| Uuid::new_v4().simple().to_string());
    let header_value = HeaderValue::from_str(&request_id).ok();

    if let Some(value) = &header_value {
        req.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
    }

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );
    let mut response = next.run(req).instrument(span).await;

    if let Some(value) = header_value {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, middleware, routing::post};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route(
                "/llm/queries",
                post(|headers: HeaderMap| async move {
                    incoming_request_id(&headers).unwrap_or_default()
                }),
            )
            .layer(middleware::from_fn(request_id_middleware))
    }

    fn post_queries(request_id: Option<&str>) -> Request {
        let mut builder = Request::builder().method("POST").uri("/llm/queries");
        if let Some(id) = request_id {
            builder = builder.header(REQUEST_ID_HEADER, id);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn keeps_caller_request_id() {
        let response = app().oneshot(post_queries(Some("abc123"))).await.unwrap();
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "abc123");
    }

    #[tokio::test]
    async fn mints_request_id_when_missing() {
        let response = app().oneshot(post_queries(None)).await.unwrap();

        let id = response.headers()[REQUEST_ID_HEADER].to_str().unwrap();
        assert_eq!(id.len(), 32);
        assert!(Uuid::parse_str(id).is_ok());
    }

    #[tokio::test]
    async fn replaces_overlong_request_id() {
        let long = "x".repeat(200);
        let response = app().oneshot(post_queries(Some(&long))).await.unwrap();

        assert_ne!(response.headers()[REQUEST_ID_HEADER], long.as_str());
    }
}
