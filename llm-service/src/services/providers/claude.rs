//! Claude on Vertex AI.
//!
//! Uses the Anthropic messages API exposed through `rawPredict` and
//! `streamRawPredict`. Material reading is not offered by this backend.

use super::vertex::VertexClient;
use super::{sse, track_release, FragmentStream, LlmProvider, ProviderError};
use crate::config::VertexConfig;
use crate::services::metrics;
use async_trait::async_trait;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};

const PROVIDER_NAME: &str = "claude";
const PUBLISHER: &str = "anthropic";
const ANTHROPIC_VERSION: &str = "vertex-2023-10-16";

pub struct ClaudeProvider {
    vertex: VertexClient,
    max_output_tokens: u32,
}

impl ClaudeProvider {
    pub fn new(config: &VertexConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            vertex: VertexClient::new(config, PUBLISHER)?,
            max_output_tokens: config.max_output_tokens,
        })
    }

    fn request<'a>(&self, context: &'a str, stream: bool) -> MessagesRequest<'a> {
        MessagesRequest {
            anthropic_version: ANTHROPIC_VERSION,
            max_tokens: self.max_output_tokens,
            temperature: 0.0,
            stream,
            messages: vec![Message {
                role: "user",
                content: context,
            }],
        }
    }
}

#[async_trait]
impl LlmProvider for ClaudeProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn model(&self) -> &str {
        self.vertex.model()
    }

    async fn generate(&self, context: &str) -> Result<String, ProviderError> {
        tracing::debug!(
            model = %self.vertex.model(),
            context_len = context.len(),
            "Sending request to Claude on Vertex AI"
        );

        let response = self
            .vertex
            .post_json("rawPredict", &self.request(context, false))
            .await?;

        let message: MessagesResponse = response.json().await.map_err(|e| {
            ProviderError::MalformedResponse(format!("Failed to parse response: {}", e))
        })?;

        Ok(message.text())
    }

    async fn generate_stream(&self, context: &str) -> Result<FragmentStream, ProviderError> {
        tracing::debug!(
            model = %self.vertex.model(),
            context_len = context.len(),
            "Starting streaming request to Claude on Vertex AI"
        );

        let response = self
            .vertex
            .post_json("streamRawPredict", &self.request(context, true))
            .await?;

        let fragments = sse::data_events(response.bytes_stream())
            .try_filter_map(|data| futures::future::ready(parse_stream_event(&data)));

        Ok(track_release(fragments, || {
            metrics::record_upstream_release(PROVIDER_NAME)
        }))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        self.vertex.check_configured()
    }
}

/// Extract the text carried by one streaming event, if any.
fn parse_stream_event(data: &str) -> Result<Option<String>, ProviderError> {
    let event: StreamEvent = serde_json::from_str(data)
        .map_err(|e| ProviderError::MalformedResponse(format!("Bad stream event: {}", e)))?;

    match event {
        StreamEvent::ContentBlockDelta {
            delta: Delta::TextDelta { text },
        } if !text.is_empty() => Ok(Some(text)),
        StreamEvent::Error { error } => {
            if error.kind == "overloaded_error" || error.kind == "rate_limit_error" {
                Err(ProviderError::RateLimited)
            } else {
                Err(ProviderError::ApiError(format!(
                    "{}: {}",
                    error.kind, error.message
                )))
            }
        }
        _ => Ok(None),
    }
}

// ============================================================================
// Messages API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    anthropic_version: &'static str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

impl MessagesResponse {
    /// Text blocks joined by newlines; other block types are ignored.
    fn text(&self) -> String {
        self.content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockDelta {
        delta: Delta,
    },
    Error {
        error: StreamError,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: String,
}
