//! HTTP client for the LLM service.
//!
//! Mirrors the four core operations over the service's HTTP surface and
//! returns the same [`Response`] envelopes. Outbound calls carry W3C trace
//! context and a request id.

use crate::models::{GenerationRequest, MaterialRequest, Response};
use crate::services::providers::{FragmentStream, ProviderError};
use crate::services::MaterialInput;
use futures::StreamExt;
use reqwest::{header, Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use service_core::observability::TracedRequestExt;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Invalid base URL {url}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("Failed to create HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

#[derive(Clone)]
pub struct LlmHttpClient {
    client: Client,
    base_url: Url,
}

impl LlmHttpClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let invalid = |reason: String| ClientError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason,
        };
        let base_url = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(invalid("cannot carry a path".to_string()));
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self { client, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> String {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url.to_string()
    }

    pub async fn generate_reply(&self, context: &str) -> Response<String> {
        let result = self
            .client
            .post(self.endpoint(&["llm", "queries"]))
            .json(&GenerationRequest::new(context))
            .traced()
            .send()
            .await;

        read_envelope(result).await
    }

    /// Start a streamed reply. On success the payload yields the reply
    /// fragments as they arrive; dropping it closes the connection.
    pub async fn generate_streamed_reply(
        &self,
        request_id: &str,
        context: &str,
    ) -> Response<FragmentStream> {
        let result = self
            .client
            .post(self.endpoint(&["llm", "streams", request_id]))
            .json(&GenerationRequest::new(context))
            .traced_with_request_id(request_id)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => return transport_failure(e),
        };

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Response::fail(status.as_u16(), message);
        }

        Response::ok(utf8_fragments(response))
    }

    pub async fn read_material(&self, input: MaterialInput) -> Response<String> {
        let request = self.client.post(self.endpoint(&["materials"])).traced();
        let request = match input {
            MaterialInput::Bytes(bytes) => request
                .header(header::CONTENT_TYPE, "application/octet-stream")
                .body(bytes),
            MaterialInput::Text(text) => request
                .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
                .body(text),
            MaterialInput::File(path) => request.json(&MaterialRequest {
                text: None,
                uri: Some(format!("file://{}", path.display())),
            }),
        };

        read_envelope(request.send().await).await
    }

    pub async fn read_next_chunk(&self, material_id: &str) -> Response<String> {
        let result = self
            .client
            .get(self.endpoint(&["materials", material_id, "chunks", "next"]))
            .traced()
            .send()
            .await;

        read_envelope(result).await
    }
}

fn transport_failure<T>(e: reqwest::Error) -> Response<T> {
    tracing::error!(error = %e, "LLM service request failed");
    let code = if e.is_timeout() { 504 } else { 502 };
    Response::fail(code, format!("LLM service unreachable: {}", e))
}

async fn read_envelope<T: DeserializeOwned>(
    result: Result<reqwest::Response, reqwest::Error>,
) -> Response<T> {
    let response = match result {
        Ok(response) => response,
        Err(e) => return transport_failure(e),
    };

    let status = response.status();
    match response.json::<Response<T>>().await {
        Ok(envelope) => envelope,
        Err(e) => {
            let code = if status == StatusCode::OK {
                502
            } else {
                status.as_u16()
            };
            Response::fail(code, format!("Unreadable response from LLM service: {}", e))
        }
    }
}

/// Decode a chunked body into text fragments without splitting characters.
fn utf8_fragments(response: reqwest::Response) -> FragmentStream {
    struct State<S> {
        body: S,
        pending: Vec<u8>,
        done: bool,
    }

    let state = State {
        body: Box::pin(response.bytes_stream()),
        pending: Vec::new(),
        done: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if state.done {
                return None;
            }

            match state.body.next().await {
                Some(Ok(bytes)) => {
                    state.pending.extend_from_slice(&bytes);
                    let valid = match std::str::from_utf8(&state.pending) {
                        Ok(_) => state.pending.len(),
                        Err(e) if e.error_len().is_none() => e.valid_up_to(),
                        Err(_) => {
                            state.done = true;
                            return Some((
                                Err(ProviderError::MalformedResponse(
                                    "stream is not valid UTF-8".to_string(),
                                )),
                                state,
                            ));
                        }
                    };
                    if valid == 0 {
                        continue;
                    }
                    let rest = state.pending.split_off(valid);
                    let text = String::from_utf8_lossy(&state.pending).into_owned();
                    state.pending = rest;
                    return Some((Ok(text), state));
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(ProviderError::NetworkError(e.to_string())), state));
                }
                None => {
                    state.done = true;
                    if state.pending.is_empty() {
                        return None;
                    }
                    let text = String::from_utf8_lossy(&state.pending).into_owned();
                    state.pending.clear();
                    return Some((Ok(text), state));
                }
            }
        }
    }))
}
