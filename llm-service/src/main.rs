use llm_service::config::LlmConfig;
use llm_service::services::metrics::init_metrics;
use llm_service::startup::Application;
use service_core::config::Config;
use service_core::observability::init_tracing;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    // Shared settings drive logging, so they load before the subscriber exists.
    let common = Config::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing("llm-service", &common.log_level, common.otlp_endpoint());

    init_metrics();

    let config = LlmConfig::with_common(common).map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    let application = Application::build(config).await.map_err(|e| {
        tracing::error!("Failed to build application: {}", e);
        std::io::Error::other(format!("Startup error: {}", e))
    })?;

    application.run_until_stopped().await
}
