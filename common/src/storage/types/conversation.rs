use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::message::Message;

stored_object!(Conversation, "conversation", {
    owner_id: String,
    title: Option<String>,
    last_message_at: DateTime<Utc>
});

impl Conversation {
    pub fn new(owner_id: String, title: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            owner_id,
            title,
            last_message_at: now,
        }
    }

    pub async fn get_complete_conversation(
        conversation_id: &str,
        owner_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(Self, Vec<Message>), AppError> {
        let conversation: Conversation = db
            .get_item(conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))?;

        if conversation.owner_id != owner_id {
            return Err(AppError::Ownership(
                "You don't have access to this conversation".to_string(),
            ));
        }

        let messages: Vec<Message> = db
            .client
            .query("SELECT * FROM type::table($table_name) WHERE conversation_id = $conversation_id ORDER BY created_at")
            .bind(("table_name", Message::table_name()))
            .bind(("conversation_id", conversation_id.to_string()))
            .await?
            .take(0)?;

        Ok((conversation, messages))
    }

    pub async fn patch_title(
        id: &str,
        owner_id: &str,
        new_title: Option<&str>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let conversation: Option<Conversation> = db.get_item(id).await?;
        let conversation =
            conversation.ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))?;

        if conversation.owner_id != owner_id {
            return Err(AppError::Ownership(
                "Unauthorized to update this conversation".to_string(),
            ));
        }

        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/title", new_title.map(str::to_string)))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::Datetime::from(Utc::now()),
            ))
            .await?;

        Ok(())
    }

    /// Bumps `last_message_at` after a turn completes, including interrupted turns which
    /// still persist a partial assistant message.
    pub async fn touch_last_message_at(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let now = Utc::now();
        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace(
                "/last_message_at",
                surrealdb::Datetime::from(now),
            ))
            .patch(PatchOp::replace("/updated_at", surrealdb::Datetime::from(now)))
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::types::message::MessageRole;

    use super::*;

    async fn seeded_db() -> SurrealDbClient {
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    #[tokio::test]
    async fn test_create_conversation() {
        let db = seeded_db().await;

        let owner_id = "test_user";
        let title = "Test Conversation";
        let conversation = Conversation::new(owner_id.to_string(), Some(title.to_string()));

        assert_eq!(conversation.owner_id, owner_id);
        assert_eq!(conversation.title.as_deref(), Some(title));
        assert_eq!(conversation.created_at, conversation.last_message_at);
        assert!(!conversation.id.is_empty());

        let result = db.store_item(conversation.clone()).await;
        assert!(result.is_ok());

        let retrieved: Option<Conversation> = db
            .get_item(&conversation.id)
            .await
            .expect("Failed to retrieve conversation");
        assert!(retrieved.is_some());

        let retrieved = retrieved.unwrap();
        assert_eq!(retrieved.id, conversation.id);
        assert_eq!(retrieved.owner_id, owner_id);
        assert_eq!(retrieved.title.as_deref(), Some(title));
    }

    #[tokio::test]
    async fn test_new_conversation_allows_no_title() {
        let conversation = Conversation::new("test_user".to_string(), None);
        assert!(conversation.title.is_none());
    }

    #[tokio::test]
    async fn test_get_complete_conversation_not_found() {
        let db = seeded_db().await;

        let result =
            Conversation::get_complete_conversation("nonexistent_id", "test_user", &db).await;
        assert!(result.is_err());

        match result {
            Err(AppError::NotFound(_)) => { /* expected error */ }
            _ => panic!("Expected NotFound error"),
        }
    }

    #[tokio::test]
    async fn test_get_complete_conversation_unauthorized() {
        let db = seeded_db().await;

        let owner_id_1 = "user_1";
        let conversation =
            Conversation::new(owner_id_1.to_string(), Some("Private Conversation".to_string()));
        let conversation_id = conversation.id.clone();

        db.store_item(conversation)
            .await
            .expect("Failed to store conversation");

        let owner_id_2 = "user_2";
        let result =
            Conversation::get_complete_conversation(&conversation_id, owner_id_2, &db).await;
        assert!(result.is_err());

        match result {
            Err(AppError::Ownership(_)) => { /* expected error */ }
            _ => panic!("Expected Ownership error"),
        }
    }

    #[tokio::test]
    async fn test_patch_title_success() {
        let db = seeded_db().await;

        let owner_id = "user_1";
        let original_title = "Original Title";
        let conversation = Conversation::new(owner_id.to_string(), Some(original_title.to_string()));
        let conversation_id = conversation.id.clone();

        db.store_item(conversation)
            .await
            .expect("Failed to store conversation");

        let new_title = "Updated Title";

        let result =
            Conversation::patch_title(&conversation_id, owner_id, Some(new_title), &db).await;
        assert!(result.is_ok());

        let updated_conversation = db
            .get_item::<Conversation>(&conversation_id)
            .await
            .expect("Failed to get conversation")
            .expect("Conversation missing");
        assert_eq!(updated_conversation.title.as_deref(), Some(new_title));
        assert_eq!(updated_conversation.owner_id, owner_id);
    }

    #[tokio::test]
    async fn test_patch_title_not_found() {
        let db = seeded_db().await;

        let result = Conversation::patch_title("nonexistent", "user_x", Some("New Title"), &db).await;

        assert!(result.is_err());
        match result {
            Err(AppError::NotFound(_)) => {}
            _ => panic!("Expected NotFound error"),
        }
    }

    #[tokio::test]
    async fn test_patch_title_unauthorized() {
        let db = seeded_db().await;

        let owner_id = "owner";
        let other_owner_id = "intruder";
        let conversation = Conversation::new(owner_id.to_string(), Some("Private".to_string()));
        let conversation_id = conversation.id.clone();

        db.store_item(conversation)
            .await
            .expect("Failed to store conversation");

        let result = Conversation::patch_title(
            &conversation_id,
            other_owner_id,
            Some("Hacked Title"),
            &db,
        )
        .await;

        assert!(result.is_err());
        match result {
            Err(AppError::Ownership(_)) => {}
            _ => panic!("Expected Ownership error"),
        }
    }

    #[tokio::test]
    async fn test_touch_last_message_at_advances_timestamp() {
        let db = seeded_db().await;
        let conversation = Conversation::new("owner".to_string(), None);
        let conversation_id = conversation.id.clone();
        let original_last_message_at = conversation.last_message_at;

        db.store_item(conversation)
            .await
            .expect("Failed to store conversation");

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        Conversation::touch_last_message_at(&conversation_id, &db)
            .await
            .expect("touch timestamp");

        let updated = db
            .get_item::<Conversation>(&conversation_id)
            .await
            .expect("Failed to get conversation")
            .expect("Conversation missing");
        assert!(updated.last_message_at > original_last_message_at);
    }

    #[tokio::test]
    async fn test_get_complete_conversation_with_messages() {
        let db = seeded_db().await;

        let owner_id_1 = "user_1";
        let conversation = Conversation::new(owner_id_1.to_string(), Some("Conversation".to_string()));
        let conversation_id = conversation.id.clone();

        db.store_item(conversation)
            .await
            .expect("Failed to store conversation");

        let message1 = Message::new(
            conversation_id.clone(),
            MessageRole::User,
            "Hello, AI!".to_string(),
            None,
        );
        let message2 = Message::new(
            conversation_id.clone(),
            MessageRole::Assistant,
            "Hello, human! How can I help you today?".to_string(),
            None,
        );
        let message3 = Message::new(
            conversation_id.clone(),
            MessageRole::User,
            "Tell me about Rust programming.".to_string(),
            None,
        );

        db.store_item(message1)
            .await
            .expect("Failed to store message1");
        db.store_item(message2)
            .await
            .expect("Failed to store message2");
        db.store_item(message3)
            .await
            .expect("Failed to store message3");

        let result =
            Conversation::get_complete_conversation(&conversation_id, owner_id_1, &db).await;
        assert!(result.is_ok(), "Failed to retrieve complete conversation");

        let (retrieved_conversation, messages) = result.unwrap();

        assert_eq!(retrieved_conversation.id, conversation_id);
        assert_eq!(retrieved_conversation.owner_id, owner_id_1);
        assert_eq!(retrieved_conversation.title.as_deref(), Some("Conversation"));

        assert_eq!(messages.len(), 3);

        let message_contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert!(message_contents.contains(&"Hello, AI!"));
        assert!(message_contents.contains(&"Hello, human! How can I help you today?"));
        assert!(message_contents.contains(&"Tell me about Rust programming."));

        let owner_id_2 = "user_2";
        let unauthorized_result =
            Conversation::get_complete_conversation(&conversation_id, owner_id_2, &db).await;
        assert!(unauthorized_result.is_err());
        match unauthorized_result {
            Err(AppError::Ownership(_)) => { /* expected error */ }
            _ => panic!("Expected Ownership error"),
        }
    }
}
