//! Mock provider for testing.
//!
//! Scripted replies and fragment sequences, with counters that record how
//! many upstream streams were opened and released.

use super::{track_release, FragmentStream, LlmProvider, ProviderError};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const MOCK_NAME: &str = "mock";
const MATERIAL_SPLIT: usize = 1024;

#[derive(Clone)]
pub struct MockProvider {
    enabled: bool,
    reply: String,
    fragments: Vec<String>,
    material_chunks: Option<Vec<String>>,
    fail_after: Option<usize>,
    hang: bool,
    opened: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            enabled: true,
            reply: "Mock reply".to_string(),
            fragments: vec!["Mock".into(), " streaming".into(), " reply".into()],
            material_chunks: None,
            fail_after: None,
            hang: false,
            opened: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = reply.into();
        self
    }

    pub fn with_fragments<I, S>(mut self, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fragments = fragments.into_iter().map(Into::into).collect();
        self
    }

    /// Fragments produced when reading material. Without this the material
    /// itself is echoed back in pieces.
    pub fn with_material_chunks<I, S>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.material_chunks = Some(chunks.into_iter().map(Into::into).collect());
        self
    }

    /// Fail every stream with a network error after `count` fragments.
    pub fn failing_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Keep streams open forever once their fragments are delivered.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Number of upstream streams opened so far.
    pub fn opened_streams(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of upstream streams released so far.
    pub fn released_streams(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    fn ensure_enabled(&self) -> Result<(), ProviderError> {
        if self.enabled {
            Ok(())
        } else {
            Err(ProviderError::NotConfigured(
                "Mock provider not enabled".to_string(),
            ))
        }
    }

    fn scripted_stream(&self, fragments: Vec<String>) -> FragmentStream {
        self.opened.fetch_add(1, Ordering::SeqCst);

        let items: Vec<Result<String, ProviderError>> = match self.fail_after {
            Some(count) => fragments
                .into_iter()
                .take(count)
                .map(Ok)
                .chain(std::iter::once(Err(ProviderError::NetworkError(
                    "mock upstream reset".to_string(),
                ))))
                .collect(),
            None => fragments.into_iter().map(Ok).collect(),
        };

        let released = self.released.clone();
        let on_release = move || {
            released.fetch_add(1, Ordering::SeqCst);
        };

        if self.hang {
            track_release(
                futures::stream::iter(items).chain(futures::stream::pending()),
                on_release,
            )
        } else {
            track_release(futures::stream::iter(items), on_release)
        }
    }
}

fn split_chars(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size)
        .map(|piece| piece.iter().collect())
        .collect()
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &'static str {
        MOCK_NAME
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn generate(&self, _context: &str) -> Result<String, ProviderError> {
        self.ensure_enabled()?;
        Ok(self.reply.clone())
    }

    async fn generate_stream(&self, _context: &str) -> Result<FragmentStream, ProviderError> {
        self.ensure_enabled()?;
        Ok(self.scripted_stream(self.fragments.clone()))
    }

    async fn stream_material(
        &self,
        material: Vec<u8>,
        _mime_type: &str,
    ) -> Result<FragmentStream, ProviderError> {
        self.ensure_enabled()?;
        let chunks = match &self.material_chunks {
            Some(chunks) => chunks.clone(),
            None => split_chars(&String::from_utf8_lossy(&material), MATERIAL_SPLIT),
        };
        Ok(self.scripted_stream(chunks))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        self.ensure_enabled()
    }
}
