use std::{collections::HashMap, sync::Arc};

use common::{
    storage::{db::SurrealDbClient, store::StorageManager},
    utils::{config::AppConfig, embedding::Embedder},
};
use orchestrator::Orchestrator;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Tracks the in-flight generation turn per conversation, enforcing strict per-conversation
/// serialization: a second inbound message while one is streaming is rejected with `busy`
/// rather than queued, and `/cancel` looks a conversation up here to cancel it.
#[derive(Clone, Default)]
pub struct ConversationTurns {
    inner: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl ConversationTurns {
    /// Registers a new turn for `conversation_id`, returning `None` if one is already active.
    pub async fn begin(&self, conversation_id: &str) -> Option<CancellationToken> {
        let mut turns = self.inner.lock().await;
        if turns.contains_key(conversation_id) {
            return None;
        }
        let token = CancellationToken::new();
        turns.insert(conversation_id.to_string(), token.clone());
        Some(token)
    }

    pub async fn end(&self, conversation_id: &str) {
        self.inner.lock().await.remove(conversation_id);
    }

    pub async fn cancel(&self, conversation_id: &str) -> bool {
        let turns = self.inner.lock().await;
        match turns.get(conversation_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub storage: StorageManager,
    pub embedder: Arc<dyn Embedder>,
    pub orchestrator: Arc<Orchestrator>,
    pub conversation_turns: ConversationTurns,
}

impl ApiState {
    pub async fn new(
        config: &AppConfig,
        storage: StorageManager,
        embedder: Arc<dyn Embedder>,
        orchestrator: Arc<Orchestrator>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let surreal_db_client = Arc::new(
            SurrealDbClient::new(
                &config.surrealdb_address,
                &config.surrealdb_username,
                &config.surrealdb_password,
                &config.surrealdb_namespace,
                &config.surrealdb_database,
            )
            .await?,
        );

        surreal_db_client.ensure_initialized(config.embedding_dimension).await?;

        Ok(Self {
            db: surreal_db_client,
            config: config.clone(),
            storage,
            embedder,
            orchestrator,
            conversation_turns: ConversationTurns::default(),
        })
    }
}
