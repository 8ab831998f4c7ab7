#![allow(clippy::module_name_repetitions)]
use uuid::Uuid;

use crate::stored_object;

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq)]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// A single retrieved chunk attached to an assistant message as a citation.
#[derive(Deserialize, Debug, Clone, Serialize, PartialEq)]
pub struct RetrievedContextItem {
    pub chunk_id: String,
    pub similarity: f32,
}

stored_object!(Message, "message", {
    conversation_id: String,
    role: MessageRole,
    content: String,
    retrieved_context: Option<Vec<RetrievedContextItem>>,
    interrupted: Option<bool>
});

impl Message {
    pub fn new(
        conversation_id: String,
        role: MessageRole,
        content: String,
        retrieved_context: Option<Vec<RetrievedContextItem>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            conversation_id,
            role,
            content,
            retrieved_context,
            interrupted: None,
        }
    }

    /// Builds the partial assistant message persisted when a chat turn is cancelled mid-stream.
    pub fn new_interrupted(
        conversation_id: String,
        content: String,
        retrieved_context: Option<Vec<RetrievedContextItem>>,
    ) -> Self {
        let mut message = Self::new(conversation_id, MessageRole::Assistant, content, retrieved_context);
        message.interrupted = Some(true);
        message
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "User"),
            MessageRole::Assistant => write!(f, "Assistant"),
            MessageRole::System => write!(f, "System"),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role, self.content)
    }
}

/// Formats a slice of messages into a plain-text transcript for prompt assembly.
pub fn format_history(history: &[Message]) -> String {
    history
        .iter()
        .map(|msg| format!("{msg}"))
        .collect::<Vec<String>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db::SurrealDbClient;

    #[tokio::test]
    async fn message_creation_assigns_fields() {
        let conversation_id = "test_conversation";
        let content = "This is a test message";
        let role = MessageRole::User;

        let message = Message::new(conversation_id.to_string(), role.clone(), content.to_string(), None);

        assert_eq!(message.conversation_id, conversation_id);
        assert_eq!(message.content, content);
        assert_eq!(message.role, role);
        assert!(message.retrieved_context.is_none());
        assert!(!message.id.is_empty());
    }

    #[tokio::test]
    async fn user_messages_never_carry_citations() {
        let message = Message::new(
            "conv".to_string(),
            MessageRole::User,
            "hi".to_string(),
            None,
        );
        assert!(message.retrieved_context.is_none());
    }

    #[tokio::test]
    async fn interrupted_assistant_message_is_flagged() {
        let message = Message::new_interrupted("conv".to_string(), "partial answer".to_string(), None);
        assert_eq!(message.interrupted, Some(true));
        assert_eq!(message.role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn message_persistence_round_trips() {
        let namespace = "test_ns";
        let database = &uuid::Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        let conversation_id = "test_conversation";
        let message = Message::new(
            conversation_id.to_string(),
            MessageRole::User,
            "Hello world".to_string(),
            None,
        );
        let message_id = message.id.clone();

        db.store_item(message.clone())
            .await
            .expect("Failed to store message");

        let retrieved: Option<Message> = db
            .get_item(&message_id)
            .await
            .expect("Failed to retrieve message");

        assert_eq!(retrieved, Some(message));
    }

    #[test]
    fn message_role_display() {
        assert_eq!(format!("{}", MessageRole::User), "User");
        assert_eq!(format!("{}", MessageRole::Assistant), "Assistant");
        assert_eq!(format!("{}", MessageRole::System), "System");
    }

    #[test]
    fn format_history_joins_messages_in_order() {
        let messages = vec![
            Message {
                id: "1".to_string(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
                conversation_id: "test_convo".to_string(),
                role: MessageRole::User,
                content: "Hello".to_string(),
                retrieved_context: None,
                interrupted: None,
            },
            Message {
                id: "2".to_string(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
                conversation_id: "test_convo".to_string(),
                role: MessageRole::Assistant,
                content: "Hi there!".to_string(),
                retrieved_context: None,
                interrupted: None,
            },
        ];

        assert_eq!(format_history(&messages), "User: Hello\nAssistant: Hi there!");
    }
}
