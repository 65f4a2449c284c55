//! Test helpers for llm-service integration tests.
//!
//! Spawns the application on a random port around a mock provider.

#![allow(dead_code)]

use llm_service::config::{LlmConfig, MaterialConfig, VertexConfig};
use llm_service::services::providers::{LlmProvider, MockProvider};
use llm_service::services::LlmGateway;
use llm_service::startup::Application;
use service_core::config::Config;
use std::sync::Arc;
use std::time::Duration;

pub const MIN_CHUNK_SIZE: usize = 64;

pub fn test_config(model: &str, base_url: Option<String>) -> LlmConfig {
    LlmConfig {
        common: Config {
            port: 0,
            ..Config::default()
        },
        vertex: VertexConfig {
            region: "us-east5".to_string(),
            project_id: "test-project".to_string(),
            model: model.to_string(),
            base_url,
            access_token: None,
            max_output_tokens: 256,
            upstream_timeout_secs: 10,
        },
        material: MaterialConfig {
            min_chunk_size: MIN_CHUNK_SIZE,
            idle_timeout_secs: 600,
            default_mime_type: "application/pdf".to_string(),
            file_root: Some(std::env::temp_dir()),
        },
    }
}

/// Running application plus a handle on its gateway.
pub struct TestApp {
    pub address: String,
    pub gateway: Arc<LlmGateway>,
    pub client: reqwest::Client,
}

impl TestApp {
    pub async fn spawn(mock: &MockProvider) -> Self {
        let provider: Arc<dyn LlmProvider> = Arc::new(mock.clone());
        Self::spawn_with(test_config("mock-model", None), Some(provider)).await
    }

    /// Spawn with `provider`, or with the provider selected from the config.
    pub async fn spawn_with(config: LlmConfig, provider: Option<Arc<dyn LlmProvider>>) -> Self {
        let app = match provider {
            Some(provider) => Application::build_with_provider(config, provider).await,
            None => Application::build(config).await,
        }
        .expect("Failed to build application");

        let address = format!("http://127.0.0.1:{}", app.http_port());
        let gateway = app.gateway();

        tokio::spawn(async move {
            let _ = app.run_until_stopped().await;
        });

        Self {
            address,
            gateway,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("Failed to build client"),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub async fn post_query(&self, context: &str) -> reqwest::Response {
        self.client
            .post(self.url("/llm/queries"))
            .json(&serde_json::json!({ "context": context }))
            .send()
            .await
            .expect("Failed to send request")
    }

    pub async fn post_stream(&self, request_id: &str, context: &str) -> reqwest::Response {
        self.client
            .post(self.url(&format!("/llm/streams/{}", request_id)))
            .json(&serde_json::json!({ "context": context }))
            .send()
            .await
            .expect("Failed to send request")
    }

    pub async fn next_chunk(&self, material_id: &str) -> reqwest::Response {
        self.client
            .get(self.url(&format!("/materials/{}/chunks/next", material_id)))
            .send()
            .await
            .expect("Failed to send request")
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
