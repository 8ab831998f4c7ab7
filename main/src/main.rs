use std::sync::Arc;

use api_router::api_routes_v1;
use axum::Router;
use common::{storage::store::StorageManager, utils::config::get_config};
use ingestion_pipeline::{
    pipeline::{DefaultPipelineServices, IngestionPipeline},
    run_worker_loop,
};
use minne_main::{build_api_state, build_embedder, init_tracing};
use tracing::{error, info};

/// All-in-one process: runs the API server and the ingestion worker loop side by side. The
/// split `server`/`worker` binaries exist for deployments that want to scale them independently.
#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = get_config()?;
    let storage = StorageManager::new(&config).await?;
    let api_state = build_api_state(&config, storage.clone()).await?;

    let worker_embedder = build_embedder(&config);
    let worker_services = Arc::new(DefaultPipelineServices::new(storage, worker_embedder));
    let ingestion_pipeline = Arc::new(IngestionPipeline::new(
        Arc::clone(&api_state.db),
        worker_services,
    ));
    let db = Arc::clone(&api_state.db);

    let app = Router::new()
        .nest("/api/v1", api_routes_v1(&api_state))
        .with_state(api_state);

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        result = run_worker_loop(db, ingestion_pipeline) => {
            if let Err(err) = result {
                error!(error = %err, "ingestion worker loop exited");
            }
        }
    }

    Ok(())
}
