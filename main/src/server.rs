use api_router::api_routes_v1;
use axum::Router;
use common::{storage::store::StorageManager, utils::config::get_config};
use minne_main::{build_api_state, init_tracing};
use tracing::info;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = get_config()?;
    let storage = StorageManager::new(&config).await?;
    let api_state = build_api_state(&config, storage).await?;

    let app = Router::new()
        .nest("/api/v1", api_routes_v1(&api_state))
        .with_state(api_state);

    info!("Starting API server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
