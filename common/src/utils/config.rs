use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Local,
    Memory,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

/// Deployment-time configuration, constructed once at startup and shared via `Arc`.
#[derive(Clone, Deserialize, Debug, Default)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    pub http_port: u16,

    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,

    /// Dimension of embeddings produced by the configured embedder; recorded per chunk.
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Tokenizer used to measure chunk boundaries during ingestion.
    #[serde(default = "default_tokenizer")]
    pub tokenizer: String,

    /// Path to the generative CLI binary driven by the orchestrator.
    #[serde(default = "default_orchestrator_binary")]
    pub orchestrator_binary: String,
    /// Closed set of model names the orchestrator is allowed to pass via `--model`.
    #[serde(default = "default_model_allowlist")]
    pub orchestrator_model_allowlist: Vec<String>,
    #[serde(default = "default_orchestrator_global_concurrency")]
    pub orchestrator_global_concurrency: usize,
    #[serde(default = "default_orchestrator_user_concurrency")]
    pub orchestrator_user_concurrency: usize,
    #[serde(default = "default_orchestrator_idle_timeout_secs")]
    pub orchestrator_idle_timeout_secs: u64,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,

    #[serde(default = "default_db_pool_size")]
    pub db_pool_size: u32,
    #[serde(default = "default_db_pool_overflow")]
    pub db_pool_overflow: u32,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_dimension() -> usize {
    1536
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_tokenizer() -> String {
    "bert-base-cased".to_string()
}

fn default_orchestrator_binary() -> String {
    "generative-cli".to_string()
}

fn default_model_allowlist() -> Vec<String> {
    vec!["default".to_string()]
}

fn default_orchestrator_global_concurrency() -> usize {
    5
}

fn default_orchestrator_user_concurrency() -> usize {
    2
}

fn default_orchestrator_idle_timeout_secs() -> u64 {
    35
}

fn default_max_upload_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_db_pool_size() -> u32 {
    20
}

fn default_db_pool_overflow() -> u32 {
    10
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
