//! Application startup and lifecycle management.

use crate::config::{LlmConfig, ProviderKind};
use crate::handlers;
use crate::handlers::materials::MAX_MATERIAL_BYTES;
use crate::middleware::metrics_middleware;
use crate::services::providers::{ClaudeProvider, GeminiProvider, LlmProvider};
use crate::services::LlmGateway;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: LlmConfig,
    pub gateway: Arc<LlmGateway>,
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application, choosing the provider from the configured model.
    pub async fn build(config: LlmConfig) -> Result<Self, AppError> {
        let provider = build_provider(&config)?;

        tracing::info!(
            provider = provider.name(),
            model = %config.vertex.model,
            region = %config.vertex.region,
            "Initialized LLM provider"
        );

        Self::build_with_provider(config, provider).await
    }

    /// Build the application around an already constructed provider.
    pub async fn build_with_provider(
        config: LlmConfig,
        provider: Arc<dyn LlmProvider>,
    ) -> Result<Self, AppError> {
        let gateway = Arc::new(LlmGateway::new(provider, config.material.clone()));
        let state = AppState {
            config: config.clone(),
            gateway,
        };

        // Bind HTTP listener (port 0 = random port for testing)
        let http_addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", http_addr, e);
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!("LLM service: HTTP on port {}", http_port);

        Ok(Self {
            http_port,
            http_listener,
            state,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn gateway(&self) -> Arc<LlmGateway> {
        Arc::clone(&self.state.gateway)
    }

    /// Run the application until a shutdown signal arrives.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.run_with_shutdown(shutdown_signal()).await
    }

    /// Run the application until `shutdown` completes.
    pub async fn run_with_shutdown<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let reaper = spawn_material_reaper(
            Arc::clone(&self.state.gateway),
            reap_interval(self.state.config.material.idle_timeout()),
        );

        let router = build_router(self.state);
        let result = axum::serve(self.http_listener, router)
            .with_graceful_shutdown(shutdown)
            .await;

        reaper.abort();

        if let Err(e) = &result {
            tracing::error!("HTTP server error: {}", e);
        }
        result
    }
}

fn build_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, AppError> {
    let provider: Arc<dyn LlmProvider> = match config.provider_kind()? {
        ProviderKind::Gemini => Arc::new(
            GeminiProvider::new(&config.vertex)
                .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?,
        ),
        ProviderKind::Claude => Arc::new(
            ClaudeProvider::new(&config.vertex)
                .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?,
        ),
    };
    Ok(provider)
}

/// Build the HTTP router for the given state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        .route("/llm/queries", post(handlers::generate_reply))
        .route(
            "/llm/streams/:request_id",
            post(handlers::generate_streamed_reply),
        )
        .route("/materials", post(handlers::read_material))
        .route(
            "/materials/:material_id/chunks/next",
            get(handlers::read_next_chunk),
        )
        .layer(DefaultBodyLimit::max(MAX_MATERIAL_BYTES))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn reap_interval(idle_timeout: Duration) -> Duration {
    (idle_timeout / 4).clamp(Duration::from_secs(1), Duration::from_secs(60))
}

fn spawn_material_reaper(
    gateway: Arc<LlmGateway>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            gateway.reap_idle_materials();
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reap_interval_is_bounded() {
        assert_eq!(reap_interval(Duration::from_secs(600)), Duration::from_secs(60));
        assert_eq!(reap_interval(Duration::from_secs(20)), Duration::from_secs(5));
        assert_eq!(reap_interval(Duration::ZERO), Duration::from_secs(1));
    }
}
