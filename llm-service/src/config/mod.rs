use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_REGION: &str = "us-central1";
const DEFAULT_MODEL: &str = "claude-sonnet-4";
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 8192;
const DEFAULT_MIN_CHUNK_SIZE: usize = 4000;
const DEFAULT_MATERIAL_IDLE_TIMEOUT_SECS: u64 = 600;
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MATERIAL_MIME: &str = "application/pdf";

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub vertex: VertexConfig,
    pub material: MaterialConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VertexConfig {
    pub region: String,
    pub project_id: String,
    /// Model id; selects the provider (`gemini*` or `claude*`).
    pub model: String,
    /// Overrides `https://{region}-aiplatform.googleapis.com`.
    pub base_url: Option<String>,
    /// OAuth access token sent as a bearer token, when set.
    pub access_token: Option<Secret<String>>,
    pub max_output_tokens: u32,
    pub upstream_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaterialConfig {
    /// Minimum length, in characters, of every chunk but the last.
    pub min_chunk_size: usize,
    /// Material sessions untouched for this long are evicted.
    pub idle_timeout_secs: u64,
    /// MIME type used when content sniffing is inconclusive.
    pub default_mime_type: String,
    /// Directory that `file://` references must resolve into. File
    /// references are refused when unset.
    pub file_root: Option<PathBuf>,
}

/// Upstream backend family, derived from the model id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Gemini,
    Claude,
}

impl LlmConfig {
    pub fn load() -> Result<Self, AppError> {
        Self::with_common(core_config::Config::load()?)
    }

    /// Complete already-loaded shared settings with the service variables.
    pub fn with_common(common_config: core_config::Config) -> Result<Self, AppError> {
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        Ok(LlmConfig {
            common: common_config,
            vertex: VertexConfig {
                region: get_env("VERTEX_AI_REGION", Some(DEFAULT_REGION), is_prod)?,
                project_id: get_env("VERTEX_AI_PROJECT_ID", Some(""), is_prod)?,
                model: get_env("VERTEX_AI_MODEL", Some(DEFAULT_MODEL), is_prod)?,
                base_url: env::var("VERTEX_AI_BASE_URL").ok().filter(|v| !v.is_empty()),
                access_token: env::var("GOOGLE_ACCESS_TOKEN")
                    .ok()
                    .filter(|v| !v.is_empty())
                    .map(Secret::new),
                max_output_tokens: get_env_parsed(
                    "MAX_OUTPUT_TOKENS",
                    DEFAULT_MAX_OUTPUT_TOKENS,
                    is_prod,
                )?,
                upstream_timeout_secs: get_env_parsed(
                    "UPSTREAM_TIMEOUT_SECS",
                    DEFAULT_UPSTREAM_TIMEOUT_SECS,
                    is_prod,
                )?,
            },
            material: MaterialConfig {
                min_chunk_size: get_env_parsed("MIN_CHUNK_SIZE", DEFAULT_MIN_CHUNK_SIZE, is_prod)?,
                idle_timeout_secs: get_env_parsed(
                    "MATERIAL_IDLE_TIMEOUT_SECS",
                    DEFAULT_MATERIAL_IDLE_TIMEOUT_SECS,
                    is_prod,
                )?,
                default_mime_type: get_env(
                    "MATERIAL_DEFAULT_MIME",
                    Some(DEFAULT_MATERIAL_MIME),
                    is_prod,
                )?,
                file_root: env::var("MATERIAL_FILE_ROOT")
                    .ok()
                    .filter(|v| !v.trim().is_empty())
                    .map(PathBuf::from),
            },
        })
    }

    /// Pick the provider family from the configured model id.
    pub fn provider_kind(&self) -> Result<ProviderKind, AppError> {
        let model = self.vertex.model.to_lowercase();
        if model.contains("gemini") {
            Ok(ProviderKind::Gemini)
        } else if model.contains("claude") {
            Ok(ProviderKind::Claude)
        } else {
            Err(AppError::ConfigError(anyhow::anyhow!(
                "No provider matches model '{}'; expected a gemini or claude model",
                self.vertex.model
            )))
        }
    }
}

impl VertexConfig {
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}

impl MaterialConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn get_env_parsed<T>(key: &str, default: T, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr + ToString,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(&default.to_string()), is_prod)?
        .trim()
        .parse()
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("{} is not valid: {}", key, e)))
}
