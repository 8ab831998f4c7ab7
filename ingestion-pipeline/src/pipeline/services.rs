use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use common::{error::AppError, storage::store::StorageManager, utils::embedding::Embedder};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};

use super::config::IngestionTuning;

/// The pipeline's external dependencies, narrowed to what each stage actually needs so tests
/// can substitute an in-memory double without standing up storage or a real embedder.
#[async_trait]
pub trait PipelineServices: Send + Sync {
    async fn load_bytes(&self, storage_path: &str) -> Result<Bytes, AppError>;

    /// Embeds `text`, retrying transient failures with exponential backoff per the configured
    /// tuning before giving up.
    async fn embed_with_retry(&self, text: &str, tuning: &IngestionTuning) -> Result<Vec<f32>, AppError>;
}

pub struct DefaultPipelineServices {
    storage: StorageManager,
    embedder: Arc<dyn Embedder>,
}

impl DefaultPipelineServices {
    pub fn new(storage: StorageManager, embedder: Arc<dyn Embedder>) -> Self {
        Self { storage, embedder }
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn load_bytes(&self, storage_path: &str) -> Result<Bytes, AppError> {
        self.storage
            .get(storage_path)
            .await
            .map_err(|err| AppError::Ingestion(format!("failed to read stored material: {err}")))
    }

    async fn embed_with_retry(&self, text: &str, tuning: &IngestionTuning) -> Result<Vec<f32>, AppError> {
        let strategy = ExponentialBackoff::from_millis(tuning.embedding_retry_base_delay_ms)
            .max_delay(std::time::Duration::from_millis(tuning.embedding_retry_max_delay_ms))
            .map(jitter)
            .take(tuning.embedding_retry_attempts);

        Retry::spawn(strategy, || self.embedder.embed(text)).await
    }
}
