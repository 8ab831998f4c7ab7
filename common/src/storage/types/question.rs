use sha2::{Digest, Sha256};
use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    Nbme,
}

impl Difficulty {
    /// Maps a 1-5 predicted difficulty (as requested at generation time) onto the closed
    /// difficulty enum persisted on the Question.
    pub fn from_predicted(predicted: u8) -> Self {
        match predicted {
            1 => Difficulty::Easy,
            2 | 3 => Difficulty::Medium,
            4 => Difficulty::Hard,
            _ => Difficulty::Nbme,
        }
    }
}

stored_object!(Question, "question", {
    owner_id: String,
    source_material_id: Option<String>,
    vignette: String,
    options: Vec<String>,
    correct_index: u8,
    explanation: String,
    topic: String,
    subtopic: Option<String>,
    difficulty: Difficulty,
    predicted_difficulty: u8,
    #[serde(default = "default_quality_score")]
    quality_score: f32,
    #[serde(default)]
    is_verified: bool,
    #[serde(default)]
    is_flagged: bool,
    #[serde(default)]
    times_answered: u32,
    #[serde(default)]
    times_correct: u32,
    source_chunk_ids: Option<Vec<String>>,
    generation_model: String,
    #[serde(default)]
    metadata: serde_json::Value,
    dedup_hash: String
});

fn default_quality_score() -> f32 {
    0.0
}

/// Normalizes (topic, vignette prefix) into a stable hash guarding against duplicate
/// generation for the same owner.
pub fn compute_dedup_hash(topic: &str, vignette: &str) -> String {
    let normalized_topic = topic.trim().to_lowercase();
    let normalized_vignette: String = vignette
        .trim()
        .to_lowercase()
        .chars()
        .take(256)
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(normalized_topic.as_bytes());
    hasher.update(b"\0");
    hasher.update(normalized_vignette.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl Question {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        owner_id: String,
        source_material_id: Option<String>,
        vignette: String,
        options: Vec<String>,
        correct_index: u8,
        explanation: String,
        topic: String,
        subtopic: Option<String>,
        predicted_difficulty: u8,
        source_chunk_ids: Option<Vec<String>>,
        generation_model: String,
        metadata: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        let dedup_hash = compute_dedup_hash(&topic, &vignette);
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            owner_id,
            source_material_id,
            vignette,
            options,
            correct_index,
            explanation,
            topic,
            subtopic,
            difficulty: Difficulty::from_predicted(predicted_difficulty),
            predicted_difficulty,
            quality_score: 0.0,
            is_verified: false,
            is_flagged: false,
            times_answered: 0,
            times_correct: 0,
            source_chunk_ids,
            generation_model,
            metadata,
            dedup_hash,
        }
    }

    /// Returns true if a Question with this owner/topic/vignette prefix already exists.
    pub async fn dedup_hash_exists(
        owner_id: &str,
        dedup_hash: &str,
        db: &SurrealDbClient,
    ) -> Result<bool, AppError> {
        let existing: Vec<Question> = db
            .client
            .query("SELECT * FROM type::table($table) WHERE owner_id = $owner_id AND dedup_hash = $dedup_hash LIMIT 1")
            .bind(("table", Self::table_name()))
            .bind(("owner_id", owner_id.to_string()))
            .bind(("dedup_hash", dedup_hash.to_string()))
            .await?
            .take(0)?;

        Ok(!existing.is_empty())
    }

    pub async fn get_for_owner(
        id: &str,
        owner_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let question: Self = db
            .get_item(id)
            .await?
            .ok_or_else(|| AppError::NotFound(id.to_string()))?;

        if question.owner_id != owner_id {
            return Err(AppError::Ownership(format!(
                "question {id} is not owned by this user"
            )));
        }

        Ok(question)
    }

    /// Atomically increments answer counters using conditional SurrealQL increments,
    /// avoiding a read-modify-write race under concurrent submissions.
    pub async fn record_answer(
        id: &str,
        is_correct: bool,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let query = if is_correct {
            "UPDATE type::thing($table, $id) SET times_answered += 1, times_correct += 1, updated_at = time::now() RETURN AFTER"
        } else {
            "UPDATE type::thing($table, $id) SET times_answered += 1, updated_at = time::now() RETURN AFTER"
        };

        let updated: Option<Self> = db
            .client
            .query(query)
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .await?
            .take(0)?;

        updated.ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    /// Deletes the question and cascades to every Attempt answering it.
    pub async fn delete(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query("DELETE FROM type::table($table) WHERE question_id = $question_id")
            .bind(("table", crate::storage::types::attempt::Attempt::table_name()))
            .bind(("question_id", id.to_string()))
            .await?;

        db.delete_item::<Self>(id).await?;
        Ok(())
    }

    pub async fn set_flagged(
        id: &str,
        is_flagged: bool,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/is_flagged", is_flagged))
            .patch(PatchOp::replace("/updated_at", Utc::now()))
            .await?;

        updated.ok_or_else(|| AppError::NotFound(id.to_string()))
    }
}
