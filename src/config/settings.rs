use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub storage: StorageConfig,
    pub budget: BudgetConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub rag: RagConfig,
    pub rate_limits: RateLimitConfig,
    pub limits: LimitsConfig,
    pub auth: AuthConfig,
}

/// Bearer-token signing (spec §6 "auth: Bearer token").
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SecurityConfig {
    pub allowed_ips: Vec<String>,
    pub custom_headers: CustomHeadersConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CustomHeadersConfig {
    pub app_id: String,
    pub api_key: String,
    pub request_signature: String,
    pub timestamp_tolerance: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max_size: u32,
    pub pool_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    pub base_url: String,
    pub bucket: String,
    pub upload_url_expires_seconds: u64,
}

/// Daily token budget and reservation TTL (spec §4.1).
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BudgetConfig {
    pub daily_token_limit: i64,
    pub reservation_ttl_seconds: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    pub model: String,
    pub base_url: String,
    pub dimension: usize,
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    pub model: String,
    pub base_url: String,
    pub timeout_seconds: u64,
    pub max_output_tokens: usize,
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RagConfig {
    pub top_k: usize,
    pub max_question_chars: usize,
    pub log_each_query: bool,
}

/// Fixed-window rate limits (spec §4.4 step 1, §4.6 upload-prepare).
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RateLimitConfig {
    pub query_limit: u32,
    pub query_window_seconds: u64,
    pub upload_prepare_limit: u32,
    pub upload_prepare_window_seconds: u64,
}

/// Document-ingestion side limits (spec §4.6 upload-prepare contract).
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LimitsConfig {
    pub max_file_size_bytes: u64,
    pub max_documents_per_workspace: i64,
    pub allowed_content_types: Vec<String>,
    pub embedding: usize,
    pub db_search: usize,
    pub llm_generate: usize,
    pub llm_stream: usize,
    pub acquire_timeout_seconds: u64,
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(true))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }

    pub fn config_path(&self) -> PathBuf {
        PathBuf::from("config/settings.toml")
    }
}
