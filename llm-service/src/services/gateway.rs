//! Core operations of the service.
//!
//! [`LlmGateway`] owns the provider and both session registries and exposes
//! one-shot generation, streamed generation, material ingestion and chunk
//! pulling. Every outcome is reported as a [`Response`] envelope.

use super::material::{coalesce, sniff_mime, MaterialInput, MaterialInputError};
use super::metrics;
use super::providers::{LlmProvider, ProviderError};
use super::registry::{Pull, RegistryError, SessionRegistry};
use super::relay::{relay, StreamRelay};
use crate::config::MaterialConfig;
use crate::models::Response;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),
}

impl LlmError {
    pub fn status_code(&self) -> u16 {
        match self {
            LlmError::Provider(e) => e.status_code(),
            LlmError::Registry(e) => e.status_code(),
            LlmError::UnsupportedInput(_) => 400,
        }
    }
}

impl From<MaterialInputError> for LlmError {
    fn from(err: MaterialInputError) -> Self {
        LlmError::UnsupportedInput(err.to_string())
    }
}

impl<T> From<Result<T, LlmError>> for Response<T> {
    fn from(result: Result<T, LlmError>) -> Self {
        match result {
            Ok(payload) => Response::ok(payload),
            Err(e) => Response::fail(e.status_code(), e.to_string()),
        }
    }
}

pub struct LlmGateway {
    provider: Arc<dyn LlmProvider>,
    replies: Arc<SessionRegistry>,
    materials: Arc<SessionRegistry>,
    material_config: MaterialConfig,
}

impl LlmGateway {
    pub fn new(provider: Arc<dyn LlmProvider>, material_config: MaterialConfig) -> Self {
        Self {
            provider,
            replies: Arc::new(SessionRegistry::new("reply")),
            materials: Arc::new(SessionRegistry::new("material")),
            material_config,
        }
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Registry of in-flight streamed replies, keyed by request id.
    pub fn replies(&self) -> &Arc<SessionRegistry> {
        &self.replies
    }

    /// Registry of open material sessions, keyed by material id.
    pub fn materials(&self) -> &Arc<SessionRegistry> {
        &self.materials
    }

    #[tracing::instrument(skip(self, context), fields(provider = self.provider.name(), context_len = context.len()))]
    pub async fn generate_reply(&self, context: &str) -> Response<String> {
        let started = Instant::now();
        let result = self.provider.generate(context).await;
        self.observe("generate", started, result.as_ref().err());

        match result {
            Ok(text) => {
                tracing::info!(reply_len = text.len(), "Reply generated");
                Response::ok(text)
            }
            Err(e) => {
                tracing::error!(error = %e, "Reply generation failed");
                Err(LlmError::from(e)).into()
            }
        }
    }

    /// Open a streamed reply under `request_id` and hand back the relay that
    /// drains it. Nothing is registered when the upstream call fails to open.
    #[tracing::instrument(skip(self, context), fields(provider = self.provider.name(), context_len = context.len()))]
    pub async fn generate_streamed_reply(
        &self,
        request_id: &str,
        context: &str,
    ) -> Response<StreamRelay> {
        self.start_stream(request_id, context).await.into()
    }

    async fn start_stream(&self, request_id: &str, context: &str) -> Result<StreamRelay, LlmError> {
        if self.replies.contains(request_id) {
            tracing::warn!("Streamed reply already in flight for this request id");
            return Err(RegistryError::Duplicate(request_id.to_string()).into());
        }

        let started = Instant::now();
        let result = self.provider.generate_stream(context).await;
        self.observe("generate_stream", started, result.as_ref().err());
        let producer = result.map_err(|e| {
            tracing::error!(error = %e, "Failed to open streamed reply");
            e
        })?;

        let lease = self.replies.register_leased(request_id, producer)?;
        tracing::info!("Streamed reply registered");
        Ok(relay(lease))
    }

    /// Ingest material and open a chunked reading session for it.
    #[tracing::instrument(skip(self, input), fields(provider = self.provider.name()))]
    pub async fn read_material(&self, input: MaterialInput) -> Response<String> {
        self.open_material(input).await.into()
    }

    async fn open_material(&self, input: MaterialInput) -> Result<String, LlmError> {
        let bytes = input
            .into_bytes(self.material_config.file_root.as_deref())
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Material rejected");
                e
            })?;

        let mime_type = match sniff_mime(&bytes) {
            Some(mime) => mime.to_string(),
            None => self.material_config.default_mime_type.clone(),
        };

        let started = Instant::now();
        let result = self
            .provider
            .stream_material(bytes, &mime_type)
            .await;
        self.observe("stream_material", started, result.as_ref().err());
        let producer = result.map_err(|e| {
            tracing::error!(error = %e, mime_type = %mime_type, "Failed to open material reading");
            e
        })?;

        let material_id = uuid::Uuid::new_v4().simple().to_string();
        self.materials.register(
            &material_id,
            coalesce(producer, self.material_config.min_chunk_size),
        )?;

        tracing::info!(material_id = %material_id, mime_type = %mime_type, "Material registered");
        Ok(material_id)
    }

    /// Pull the next chunk of a material.
    ///
    /// The pull that finds the material exhausted answers with a payload-less
    /// success carrying code 204; the session is gone afterwards and further
    /// pulls answer 404.
    #[tracing::instrument(skip(self))]
    pub async fn read_next_chunk(&self, material_id: &str) -> Response<String> {
        match self.materials.pull(material_id).await {
            Ok(Pull::Fragment(chunk)) => Response::ok(chunk),
            Ok(Pull::Exhausted) => {
                tracing::info!("Material exhausted");
                Response::empty(204, format!("material {} exhausted", material_id))
            }
            Err(e) => {
                match &e {
                    RegistryError::NotFound(_) => {
                        tracing::debug!("Material not found")
                    }
                    _ => tracing::error!(error = %e, "Material reading failed"),
                }
                Err(LlmError::from(e)).into()
            }
        }
    }

    /// Drop material sessions idle for longer than the configured timeout.
    pub fn reap_idle_materials(&self) -> usize {
        let evicted = self
            .materials
            .evict_idle(self.material_config.idle_timeout());
        if evicted > 0 {
            tracing::info!(evicted, "Evicted idle material sessions");
        }
        evicted
    }

    fn observe(&self, operation: &str, started: Instant, error: Option<&ProviderError>) {
        let provider = self.provider.name();
        metrics::record_provider_latency(provider, operation, started.elapsed().as_secs_f64());
        if let Some(e) = error {
            metrics::record_provider_error(provider, e.kind());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::providers::MockProvider;
    use futures::StreamExt;

    fn material_config(min_chunk_size: usize) -> MaterialConfig {
        MaterialConfig {
            min_chunk_size,
            idle_timeout_secs: 600,
            default_mime_type: "application/pdf".to_string(),
            file_root: None,
        }
    }

    fn gateway(mock: &MockProvider, min_chunk_size: usize) -> LlmGateway {
        LlmGateway::new(Arc::new(mock.clone()), material_config(min_chunk_size))
    }

    #[tokio::test]
    async fn one_shot_reply_is_wrapped_in_envelope() {
        let mock = MockProvider::new().with_reply("42");
        let response = gateway(&mock, 10).generate_reply("question").await;

        assert!(response.is_success);
        assert_eq!(response.payload.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn upstream_failure_becomes_failed_envelope() {
        let mock = MockProvider::new().disabled();
        let response = gateway(&mock, 10).generate_reply("question").await;

        assert!(!response.is_success);
        assert_eq!(response.code, 503);
        assert!(response.payload.is_none());
    }

    #[tokio::test]
    async fn duplicate_request_id_does_not_open_upstream() {
        let mock = MockProvider::new().hanging();
        let gateway = gateway(&mock, 10);

        let first = gateway.generate_streamed_reply("dup", "ctx").await;
        assert!(first.is_success);

        let second = gateway.generate_streamed_reply("dup", "ctx").await;
        assert!(!second.is_success);
        assert_eq!(second.code, 409);
        assert_eq!(mock.opened_streams(), 1);

        drop(first);
        assert!(!gateway.replies().contains("dup"));
    }

    #[tokio::test]
    async fn failed_open_registers_nothing() {
        let mock = MockProvider::new().disabled();
        let gateway = gateway(&mock, 10);

        let response = gateway.generate_streamed_reply("x", "ctx").await;
        assert!(!response.is_success);
        assert!(gateway.replies().is_empty());
    }

    #[tokio::test]
    async fn streamed_reply_drains_and_unregisters() {
        let mock = MockProvider::new().with_fragments(["Hello", " world", "!"]);
        let gateway = gateway(&mock, 10);

        let body = gateway
            .generate_streamed_reply("abc123", "ctx")
            .await
            .payload
            .unwrap();
        let text: Vec<u8> = body
            .map(|chunk| chunk.unwrap().to_vec())
            .concat()
            .await;

        assert_eq!(text, b"Hello world!");
        assert!(!gateway.replies().contains("abc123"));
        assert_eq!(mock.released_streams(), 1);
    }

    #[tokio::test]
    async fn material_chunks_then_exhaustion_then_not_found() {
        let mock = MockProvider::new().with_material_chunks(["aaaa", "bbbb", "cc"]);
        let gateway = gateway(&mock, 6);

        let id = gateway
            .read_material(MaterialInput::Bytes(b"%PDF-1.4".to_vec()))
            .await
            .payload
            .unwrap();
        assert_eq!(id.len(), 32);

        let first = gateway.read_next_chunk(&id).await;
        assert_eq!(first.payload.as_deref(), Some("aaaabbbb"));

        let second = gateway.read_next_chunk(&id).await;
        assert_eq!(second.payload.as_deref(), Some("cc"));

        let exhausted = gateway.read_next_chunk(&id).await;
        assert!(exhausted.is_success);
        assert_eq!(exhausted.code, 204);
        assert!(exhausted.payload.is_none());

        let gone = gateway.read_next_chunk(&id).await;
        assert!(!gone.is_success);
        assert_eq!(gone.code, 404);
    }

    #[tokio::test]
    async fn empty_material_is_unsupported_input() {
        let mock = MockProvider::new();
        let gateway = gateway(&mock, 6);

        let response = gateway.read_material(MaterialInput::Bytes(Vec::new())).await;
        assert_eq!(response.code, 400);
        assert_eq!(mock.opened_streams(), 0);
        assert!(gateway.materials().is_empty());
    }

    #[tokio::test]
    async fn material_unsupported_by_backend_is_501() {
        struct TextOnly;

        #[async_trait::async_trait]
        impl LlmProvider for TextOnly {
            fn name(&self) -> &'static str {
                "text-only"
            }
            fn model(&self) -> &str {
                "text-only"
            }
            async fn health_check(&self) -> Result<(), ProviderError> {
                Ok(())
            }
        }

        let gateway = LlmGateway::new(Arc::new(TextOnly), material_config(6));
        let response = gateway
            .read_material(MaterialInput::Text("hello".into()))
            .await;
        assert_eq!(response.code, 501);
    }
}
