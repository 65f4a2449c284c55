//! LLM provider abstractions and implementations.
//!
//! Every upstream backend implements [`LlmProvider`]. The capability set is
//! one-shot generation, streamed generation and streamed document reading;
//! a backend that lacks one of them keeps the default implementation, which
//! fails with [`ProviderError::NotSupported`].

pub mod claude;
pub mod gemini;
pub mod mock;
pub mod sse;
pub mod vertex;

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;

pub use claude::ClaudeProvider;
pub use gemini::GeminiProvider;
pub use mock::MockProvider;

/// Error type for provider operations.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("{0} is not supported by this provider")]
    NotSupported(&'static str),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Malformed upstream response: {0}")]
    MalformedResponse(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Content filtered")]
    ContentFiltered,
}

impl ProviderError {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::NotConfigured(_) => "not_configured",
            ProviderError::NotSupported(_) => "not_supported",
            ProviderError::ApiError(_) => "api",
            ProviderError::NetworkError(_) => "network",
            ProviderError::MalformedResponse(_) => "malformed",
            ProviderError::RateLimited => "rate_limited",
            ProviderError::ContentFiltered => "content_filtered",
        }
    }

    /// HTTP-equivalent status for the result envelope.
    pub fn status_code(&self) -> u16 {
        match self {
            ProviderError::NotConfigured(_) => 503,
            ProviderError::NotSupported(_) => 501,
            ProviderError::ApiError(_)
            | ProviderError::NetworkError(_)
            | ProviderError::MalformedResponse(_) => 502,
            ProviderError::RateLimited => 429,
            ProviderError::ContentFiltered => 400,
        }
    }
}

/// Forward-only sequence of text fragments produced by an upstream call.
///
/// The stream owns the upstream connection; dropping it releases the
/// connection.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Capability interface shared by all upstream backends.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Backend label, e.g. "claude".
    fn name(&self) -> &'static str;

    /// Configured model id.
    fn model(&self) -> &str;

    /// Single-shot generation. Returns the text content of the reply.
    async fn generate(&self, _context: &str) -> Result<String, ProviderError> {
        Err(ProviderError::NotSupported("generation"))
    }

    /// Open a streaming generation call.
    async fn generate_stream(&self, _context: &str) -> Result<FragmentStream, ProviderError> {
        Err(ProviderError::NotSupported("streamed generation"))
    }

    /// Open a streaming document-understanding call over raw bytes.
    async fn stream_material(
        &self,
        _material: Vec<u8>,
        _mime_type: &str,
    ) -> Result<FragmentStream, ProviderError> {
        Err(ProviderError::NotSupported("material reading"))
    }

    /// Health check.
    async fn health_check(&self) -> Result<(), ProviderError>;
}

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// Stream adapter that releases the inner upstream stream exactly once:
/// on exhaustion, on the first error, or when dropped unfinished.
pub struct ReleaseOnDrop {
    inner: Option<FragmentStream>,
    on_release: Option<ReleaseHook>,
}

impl ReleaseOnDrop {
    fn release(&mut self) {
        self.inner = None;
        if let Some(hook) = self.on_release.take() {
            hook();
        }
    }
}

impl Stream for ReleaseOnDrop {
    type Item = Result<String, ProviderError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Some(inner) = self.inner.as_mut() else {
            return Poll::Ready(None);
        };

        match inner.as_mut().poll_next(cx) {
            Poll::Ready(None) => {
                self.release();
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(e))) => {
                self.release();
                Poll::Ready(Some(Err(e)))
            }
            other => other,
        }
    }
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.release();
    }
}

/// Wrap an upstream stream so `on_release` runs exactly once when the
/// connection is let go, whichever way that happens.
pub fn track_release<S>(stream: S, on_release: impl FnOnce() + Send + 'static) -> FragmentStream
where
    S: Stream<Item = Result<String, ProviderError>> + Send + 'static,
{
    Box::pin(ReleaseOnDrop {
        inner: Some(Box::pin(stream)),
        on_release: Some(Box::new(on_release)),
    })
}
