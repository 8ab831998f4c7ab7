use async_openai::types::CreateEmbeddingRequestArgs;
use async_trait::async_trait;
use tracing::debug;

use crate::error::AppError;

/// Produces a fixed-dimension embedding vector for a piece of text.
///
/// Implementations must be stable across calls for the lifetime of a deployment: the
/// vector dimension returned by `dimension()` is recorded alongside every stored
/// embedding and must never silently change underneath an existing index.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, input: &str) -> Result<Vec<f32>, AppError>;

    fn dimension(&self) -> usize;
}

/// Default embedder backed by an OpenAI-compatible embeddings endpoint.
pub struct OpenAiEmbedder {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedder {
    #[must_use]
    pub fn new(
        client: async_openai::Client<async_openai::config::OpenAIConfig>,
        model: impl Into<String>,
        dimension: usize,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            dimension,
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
        let dimension =
            u32::try_from(self.dimension).map_err(|_| AppError::Retrieval("embedding dimension out of range".to_string()))?;

        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .dimensions(dimension)
            .input([input])
            .build()
            .map_err(|err| AppError::Retrieval(err.to_string()))?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|err| AppError::Retrieval(err.to_string()))?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Retrieval("no embedding data received".to_string()))?
            .embedding;

        debug!(dimension = embedding.len(), "embedding generated");

        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_embedder_reports_configured_dimension() {
        let client = async_openai::Client::with_config(async_openai::config::OpenAIConfig::new());
        let embedder = OpenAiEmbedder::new(client, "text-embedding-3-small", 1536);
        assert_eq!(embedder.dimension(), 1536);
    }
}
