use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use common::{
    error::AppError,
    storage::types::{
        conversation::Conversation,
        message::{Message, MessageRole},
    },
};
use serde::{Deserialize, Serialize};

use crate::{api_state::ApiState, error::ApiError, middleware_api_auth::OwnerId};

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConversationView {
    pub id: String,
    pub title: Option<String>,
    pub last_message_at: chrono::DateTime<chrono::Utc>,
}

impl From<Conversation> for ConversationView {
    fn from(conversation: Conversation) -> Self {
        Self {
            id: conversation.id,
            title: conversation.title,
            last_message_at: conversation.last_message_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageView {
    pub id: String,
    pub role: String,
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<Message> for MessageView {
    fn from(message: Message) -> Self {
        let role = match message.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        };
        Self {
            id: message.id,
            role: role.to_string(),
            content: message.content,
            created_at: message.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConversationWithMessages {
    #[serde(flatten)]
    pub conversation: ConversationView,
    pub messages: Vec<MessageView>,
}

pub async fn create_conversation(
    State(state): State<ApiState>,
    OwnerId(owner_id): OwnerId,
    Json(request): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = Conversation::new(owner_id, request.title);
    state
        .db
        .store_item(conversation.clone())
        .await
        .map_err(AppError::Database)?;
    Ok((StatusCode::CREATED, Json(ConversationView::from(conversation))))
}

pub async fn get_conversation(
    State(state): State<ApiState>,
    OwnerId(owner_id): OwnerId,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (conversation, messages) =
        Conversation::get_complete_conversation(&id, &owner_id, &state.db).await?;

    Ok(Json(ConversationWithMessages {
        conversation: ConversationView::from(conversation),
        messages: messages.into_iter().map(MessageView::from).collect(),
    }))
}
