use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::question::Question},
};
use orchestrator::{Effort, GenerationRequest, Orchestrator, Verbosity};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Closed mapping from the requested 1-5 difficulty to the wording handed to the model.
/// Persisted difficulty is derived separately by `Question::new` via `Difficulty::from_predicted`.
fn difficulty_description(d: u8) -> &'static str {
    match d {
        1 => "very easy, testing recall of a single isolated fact",
        2 => "easy, testing straightforward application of one concept",
        3 => "moderate, requiring integration of two or three related concepts",
        4 => "hard, requiring multi-step clinical reasoning across a vignette",
        5 => "NBME-caliber, requiring discrimination between closely related diagnoses or next steps",
        _ => "moderate, requiring integration of two or three related concepts",
    }
}

/// Renders the fixed instructions every generation call shares: JSON schema, the four-option
/// constraint, single-best-answer rule, and the explanation/teaching-points requirement.
struct SystemPreamble;

impl SystemPreamble {
    fn render(&self) -> String {
        "You are generating NBME-style multiple-choice questions for a medical student. \
         Respond with a single JSON object of the exact shape:\n\
         {\"questions\": [{\"vignette\": string, \"question\": string, \"options\": [string, string, string, string], \
         \"correct_index\": integer 0-3, \"explanation\": string, \"teaching_points\": [string] | null}]}\n\
         Rules: exactly four options per question; exactly one best answer; explanation must \
         justify the correct option and address why the others are wrong; do not wrap the JSON \
         in prose.".to_string()
    }
}

/// Renders the retrieved context block, or an explicit statement that none was supplied.
struct ContextBlock<'a> {
    rag_context: Option<&'a str>,
}

impl ContextBlock<'_> {
    fn render(&self) -> String {
        match self.rag_context {
            Some(context) if !context.trim().is_empty() => {
                format!("Source material context:\n{context}")
            }
            _ => "No source material context was provided; draw on general medical knowledge.".to_string(),
        }
    }
}

/// Renders the per-call parameters: topic, difficulty, batch size, student level.
struct GenerationInstructions<'a> {
    topic: &'a str,
    difficulty: u8,
    n: u8,
    student_level: u8,
}

impl GenerationInstructions<'_> {
    fn render(&self) -> String {
        format!(
            "Generate {n} question(s) on the topic \"{topic}\" at difficulty {difficulty} \
             ({description}), calibrated for a student at level {level} of 5.",
            n = self.n,
            topic = self.topic,
            difficulty = self.difficulty,
            description = difficulty_description(self.difficulty),
            level = self.student_level,
        )
    }
}

fn assemble_prompt(topic: &str, difficulty: u8, n: u8, student_level: u8, rag_context: Option<&str>) -> String {
    let preamble = SystemPreamble.render();
    let context = ContextBlock { rag_context }.render();
    let instructions = GenerationInstructions {
        topic,
        difficulty,
        n,
        student_level,
    }
    .render();

    format!("{preamble}\n\n{context}\n\n{instructions}")
}

#[derive(Debug, Deserialize)]
struct GeneratedQuestion {
    #[serde(default)]
    vignette: String,
    #[serde(default)]
    question: String,
    #[serde(default)]
    options: Vec<String>,
    #[serde(default)]
    correct_index: i64,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    teaching_points: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct GeneratedQuestionBatch {
    #[serde(default)]
    questions: Vec<GeneratedQuestion>,
}

fn validate(raw: &GeneratedQuestion) -> Result<(), &'static str> {
    if raw.vignette.trim().is_empty() {
        return Err("vignette is empty");
    }
    if raw.question.trim().is_empty() {
        return Err("question stem is empty");
    }
    if raw.explanation.trim().is_empty() {
        return Err("explanation is empty");
    }
    if raw.options.len() != 4 || raw.options.iter().any(|o| o.trim().is_empty()) {
        return Err("options must be exactly four non-empty strings");
    }
    if !(0..4).contains(&raw.correct_index) {
        return Err("correct_index out of range");
    }
    Ok(())
}

pub struct GenerationRequestParams<'a> {
    pub owner_id: &'a str,
    pub topic: &'a str,
    pub difficulty: u8,
    pub n: u8,
    pub student_level: u8,
    pub rag_context: Option<&'a str>,
    pub source_chunk_ids: Option<Vec<String>>,
    pub model: String,
}

pub struct QuestionGenerator<'a> {
    orchestrator: &'a Orchestrator,
}

impl<'a> QuestionGenerator<'a> {
    pub fn new(orchestrator: &'a Orchestrator) -> Self {
        Self { orchestrator }
    }

    /// Generates, validates, deduplicates, and persists a batch of Questions. Items that fail
    /// validation or collide with an existing `dedup_hash` for this owner are dropped and
    /// logged; a call that survives with zero questions fails outright.
    pub async fn generate(
        &self,
        params: GenerationRequestParams<'_>,
        db: &SurrealDbClient,
        cancel: CancellationToken,
    ) -> Result<Vec<Question>, AppError> {
        let prompt = assemble_prompt(
            params.topic,
            params.difficulty,
            params.n,
            params.student_level,
            params.rag_context,
        );

        let request = GenerationRequest {
            user_id: params.owner_id.to_string(),
            model: params.model.clone(),
            effort: Effort::Low,
            verbosity: Verbosity::Medium,
            prompt,
        };

        let batch: GeneratedQuestionBatch =
            self.orchestrator.generate_structured(request, cancel).await?;

        if batch.questions.is_empty() {
            return Err(AppError::GenerationFormat(
                "generation returned no questions".to_string(),
            ));
        }

        let mut persisted = Vec::new();
        for raw in batch.questions {
            if let Err(reason) = validate(&raw) {
                warn!(reason, "dropping invalid generated question");
                continue;
            }

            let vignette = format!("{}\n\n{}", raw.vignette.trim(), raw.question.trim());

            let dedup_hash = common::storage::types::question::compute_dedup_hash(params.topic, &vignette);
            if Question::dedup_hash_exists(params.owner_id, &dedup_hash, db).await? {
                warn!(topic = params.topic, "dropping duplicate generated question");
                continue;
            }

            let metadata = serde_json::json!({
                "teaching_points": raw.teaching_points,
            });

            let question = Question::new(
                params.owner_id.to_string(),
                None,
                vignette,
                raw.options,
                raw.correct_index as u8,
                raw.explanation,
                params.topic.to_string(),
                None,
                params.difficulty,
                params.source_chunk_ids.clone(),
                params.model.clone(),
                metadata,
            );

            db.store_item(question.clone()).await?;
            persisted.push(question);
        }

        if persisted.is_empty() {
            return Err(AppError::GenerationFormat(
                "no generated question survived validation or dedup".to_string(),
            ));
        }

        Ok(persisted)
    }
}
