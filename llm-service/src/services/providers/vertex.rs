//! Shared plumbing for Vertex AI publisher-model endpoints.

use super::ProviderError;
use crate::config::VertexConfig;
use reqwest::{Client, Response};
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;

/// HTTP client bound to one Vertex publisher model.
#[derive(Clone)]
pub struct VertexClient {
    client: Client,
    base_url: String,
    project_id: String,
    region: String,
    publisher: &'static str,
    model: String,
    access_token: Option<Secret<String>>,
}

impl VertexClient {
    pub fn new(config: &VertexConfig, publisher: &'static str) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.upstream_timeout())
            .build()
            .map_err(|e| {
                ProviderError::NotConfigured(format!("Failed to create HTTP client: {}", e))
            })?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| format!("https://{}-aiplatform.googleapis.com", config.region));

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            project_id: config.project_id.clone(),
            region: config.region.clone(),
            publisher,
            model: config.model.clone(),
            access_token: config.access_token.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Full URL of a model method, e.g. `rawPredict`.
    pub fn method_url(&self, method: &str) -> String {
        format!(
            "{}/v1/projects/{}/locations/{}/publishers/{}/models/{}:{}",
            self.base_url, self.project_id, self.region, self.publisher, self.model, method
        )
    }

    /// POST a JSON body to a model method. Non-success statuses become errors.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        method: &str,
        body: &T,
    ) -> Result<Response, ProviderError> {
        let url = self.method_url(method);

        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                return Err(ProviderError::RateLimited);
            }

            return Err(ProviderError::ApiError(format!(
                "Vertex AI error {}: {}",
                status, error_text
            )));
        }

        Ok(response)
    }

    pub fn check_configured(&self) -> Result<(), ProviderError> {
        if self.project_id.is_empty() {
            return Err(ProviderError::NotConfigured(
                "Vertex AI project id not configured".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: Option<&str>) -> VertexConfig {
        VertexConfig {
            region: "europe-west1".to_string(),
            project_id: "acme".to_string(),
            model: "claude-sonnet-4".to_string(),
            base_url: base_url.map(str::to_string),
            access_token: None,
            max_output_tokens: 1024,
            upstream_timeout_secs: 30,
        }
    }

    #[test]
    fn default_endpoint_is_regional() {
        let client = VertexClient::new(&config(None), "anthropic").unwrap();
        assert_eq!(
            client.method_url("rawPredict"),
            "https://europe-west1-aiplatform.googleapis.com/v1/projects/acme/locations/europe-west1/publishers/anthropic/models/claude-sonnet-4:rawPredict"
        );
    }

    #[test]
    fn base_url_override_drops_trailing_slash() {
        let client = VertexClient::new(&config(Some("http://127.0.0.1:9000/")), "google").unwrap();
        assert!(client
            .method_url("generateContent")
            .starts_with("http://127.0.0.1:9000/v1/projects/acme/"));
    }

    #[test]
    fn missing_project_is_not_configured() {
        let mut cfg = config(None);
        cfg.project_id.clear();
        let client = VertexClient::new(&cfg, "google").unwrap();
        assert!(matches!(
            client.check_configured(),
            Err(ProviderError::NotConfigured(_))
        ));
    }
}
