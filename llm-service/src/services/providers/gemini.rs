//! Gemini on Vertex AI.
//!
//! Implements generation and material reading using the `generateContent`
//! family of methods. Streaming uses `streamGenerateContent?alt=sse`.

use super::vertex::VertexClient;
use super::{sse, track_release, FragmentStream, LlmProvider, ProviderError};
use crate::config::VertexConfig;
use crate::services::metrics;
use async_trait::async_trait;
use base64::Engine;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};

const PROVIDER_NAME: &str = "gemini";
const PUBLISHER: &str = "google";

/// Gemini text and document provider.
pub struct GeminiProvider {
    vertex: VertexClient,
    max_output_tokens: u32,
}

impl GeminiProvider {
    pub fn new(config: &VertexConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            vertex: VertexClient::new(config, PUBLISHER)?,
            max_output_tokens: config.max_output_tokens,
        })
    }

    fn request(&self, parts: Vec<ContentPart>) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts,
            }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                max_output_tokens: self.max_output_tokens,
            },
        }
    }

    async fn open_stream(
        &self,
        request: &GenerateContentRequest,
    ) -> Result<FragmentStream, ProviderError> {
        let response = self
            .vertex
            .post_json("streamGenerateContent?alt=sse", request)
            .await?;

        let fragments = sse::data_events(response.bytes_stream())
            .try_filter_map(|data| futures::future::ready(parse_stream_chunk(&data)));

        Ok(track_release(fragments, || {
            metrics::record_upstream_release(PROVIDER_NAME)
        }))
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn model(&self) -> &str {
        self.vertex.model()
    }

    async fn generate(&self, context: &str) -> Result<String, ProviderError> {
        let request = self.request(vec![ContentPart::text(context)]);

        tracing::debug!(
            model = %self.vertex.model(),
            context_len = context.len(),
            "Sending request to Gemini on Vertex AI"
        );

        let response = self.vertex.post_json("generateContent", &request).await?;

        let api_response: GenerateContentResponse = response.json().await.map_err(|e| {
            ProviderError::MalformedResponse(format!("Failed to parse response: {}", e))
        })?;

        api_response.text()
    }

    async fn generate_stream(&self, context: &str) -> Result<FragmentStream, ProviderError> {
        tracing::debug!(
            model = %self.vertex.model(),
            context_len = context.len(),
            "Starting streaming request to Gemini on Vertex AI"
        );

        self.open_stream(&self.request(vec![ContentPart::text(context)]))
            .await
    }

    async fn stream_material(
        &self,
        material: Vec<u8>,
        mime_type: &str,
    ) -> Result<FragmentStream, ProviderError> {
        tracing::debug!(
            model = %self.vertex.model(),
            material_len = material.len(),
            mime_type = %mime_type,
            "Starting material read on Gemini on Vertex AI"
        );

        let part = ContentPart::InlineData {
            inline_data: InlineData {
                mime_type: mime_type.to_string(),
                data: base64::engine::general_purpose::STANDARD.encode(&material),
            },
        };

        self.open_stream(&self.request(vec![part])).await
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        self.vertex.check_configured()
    }
}

fn parse_stream_chunk(data: &str) -> Result<Option<String>, ProviderError> {
    let chunk: GenerateContentResponse = serde_json::from_str(data)
        .map_err(|e| ProviderError::MalformedResponse(format!("Bad stream chunk: {}", e)))?;

    let text = chunk.text()?;
    Ok(if text.is_empty() { None } else { Some(text) })
}

// ============================================================================
// Gemini API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<ContentPart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum ContentPart {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thought: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    InlineData { inline_data: InlineData },
    Other(serde_json::Value),
}

impl ContentPart {
    fn text(text: &str) -> Self {
        ContentPart::Text {
            text: text.to_string(),
            thought: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

impl GenerateContentResponse {
    /// Concatenated non-thought text of the first candidate.
    fn text(&self) -> Result<String, ProviderError> {
        if self
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
            .is_some()
        {
            return Err(ProviderError::ContentFiltered);
        }

        let Some(candidate) = self.candidates.first() else {
            return Ok(String::new());
        };

        if candidate.finish_reason.as_deref() == Some("SAFETY") {
            return Err(ProviderError::ContentFiltered);
        }

        let text = candidate
            .content
            .as_ref()
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| match part {
                        ContentPart::Text { text, thought } if *thought != Some(true) => {
                            Some(text.as_str())
                        }
                        _ => None,
                    })
                    .collect::<String>()
            })
            .unwrap_or_default();

        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}
