//! Environment-backed configuration
//!
//! Loads collaborator endpoints, model names and execution limits from the
//! environment (with `.env` support). Missing values fall back to defaults;
//! the API key is only required when a network client is constructed.

use std::time::Duration;

/// Default billing ceiling for warehouse queries (10 GB).
pub const DEFAULT_MAX_BYTES_BILLED: u64 = 10 * 1024 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// API key for the generation/embedding provider
    pub api_key: String,

    /// Base URL for the OpenAI-compatible API
    pub api_base_url: String,

    /// Chat model used for generation and extraction assist
    pub chat_model: String,

    /// Embedding model for the vector index
    pub embedding_model: String,

    /// Warehouse project (BigQuery project id)
    pub warehouse_project: Option<String>,

    /// Optional dataset scope for the safety validator, e.g. ["myproject.analytics"]
    pub dataset_scope: Option<Vec<String>>,

    /// Billing ceiling applied when the caller does not supply one
    pub max_bytes_billed: u64,

    /// Upper bound on a single generation-model call
    pub generation_timeout: Duration,

    /// Upper bound on a single warehouse execution
    pub execution_timeout: Duration,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base_url: "https://api.openai.com/v1".to_string(),
            chat_model: "gpt-4o".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            warehouse_project: None,
            dataset_scope: None,
            max_bytes_billed: DEFAULT_MAX_BYTES_BILLED,
            generation_timeout: Duration::from_secs(60),
            execution_timeout: Duration::from_secs(30),
        }
    }
}

impl AssistantConfig {
    /// Load configuration from the environment, reading `.env` if present.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let defaults = Self::default();

        let dataset_scope = std::env::var("QUERYPILOT_DATASET_SCOPE")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|v| !v.is_empty());

        Self {
            api_key: std::env::var("OPENAI_API_KEY").unwrap_or(defaults.api_key),
            api_base_url: std::env::var("OPENAI_BASE_URL").unwrap_or(defaults.api_base_url),
            chat_model: std::env::var("QUERYPILOT_CHAT_MODEL").unwrap_or(defaults.chat_model),
            embedding_model: std::env::var("QUERYPILOT_EMBEDDING_MODEL")
                .unwrap_or(defaults.embedding_model),
            warehouse_project: std::env::var("QUERYPILOT_WAREHOUSE_PROJECT").ok(),
            dataset_scope,
            max_bytes_billed: env_u64("QUERYPILOT_MAX_BYTES_BILLED", defaults.max_bytes_billed),
            generation_timeout: Duration::from_secs(env_u64(
                "QUERYPILOT_GENERATION_TIMEOUT_SECS",
                defaults.generation_timeout.as_secs(),
            )),
            execution_timeout: Duration::from_secs(env_u64(
                "QUERYPILOT_EXECUTION_TIMEOUT_SECS",
                defaults.execution_timeout.as_secs(),
            )),
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}
