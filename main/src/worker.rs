use std::sync::Arc;

use common::{
    storage::db::SurrealDbClient, storage::store::StorageManager, utils::config::get_config,
};
use ingestion_pipeline::{
    pipeline::{DefaultPipelineServices, IngestionPipeline},
    run_worker_loop,
};
use minne_main::{build_embedder, init_tracing};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.ensure_initialized(config.embedding_dimension).await?;

    let storage = StorageManager::new(&config).await?;
    let embedder = build_embedder(&config);
    let services = Arc::new(DefaultPipelineServices::new(storage, embedder));
    let ingestion_pipeline = Arc::new(IngestionPipeline::new(db.clone(), services));

    run_worker_loop(db, ingestion_pipeline).await
}
