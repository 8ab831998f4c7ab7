use std::sync::Arc;

use api_router::api_state::ApiState;
use common::{
    error::AppError,
    storage::store::StorageManager,
    utils::{
        config::AppConfig,
        embedding::{Embedder, OpenAiEmbedder},
    },
};
use orchestrator::{Orchestrator, OrchestratorConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs the tracing subscriber once per process, reading filter directives from the
/// environment. Safe to call from every binary; a second call is a harmless no-op.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();
}

/// Builds the `async-openai`-backed embedder shared by the API server and the ingestion worker.
pub fn build_embedder(config: &AppConfig) -> Arc<dyn Embedder> {
    let client = async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    );

    Arc::new(OpenAiEmbedder::new(
        client,
        config.embedding_model.clone(),
        config.embedding_dimension,
    ))
}

/// Spawns the generative-CLI orchestrator, resolving its binary on `PATH` per the configured
/// model allowlist and concurrency limits.
pub fn build_orchestrator(config: &AppConfig) -> Result<Arc<Orchestrator>, AppError> {
    Ok(Arc::new(Orchestrator::new(OrchestratorConfig::from(
        config,
    ))?))
}

/// Assembles the `ApiState` shared by every HTTP route: connects to SurrealDB, ensures runtime
/// indexes exist for the configured embedding dimension, and wires storage, embedder and
/// orchestrator.
pub async fn build_api_state(
    config: &AppConfig,
    storage: StorageManager,
) -> Result<ApiState, Box<dyn std::error::Error>> {
    let embedder = build_embedder(config);
    let orchestrator = build_orchestrator(config)?;

    Ok(ApiState::new(config, storage, embedder, orchestrator).await?)
}
