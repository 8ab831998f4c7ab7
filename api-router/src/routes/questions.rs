use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use common::{
    error::AppError,
    storage::types::question::Question,
    utils::config::AppConfig,
};
use orchestrator::Orchestrator;
use practice_engine::{due_queue, GenerationRequestParams, Grader, QuestionGenerator};
use retrieval_pipeline::retrieve;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{api_state::ApiState, error::ApiError, middleware_api_auth::OwnerId};

/// Number of context chunks retrieved for RAG-backed generation.
const RAG_TOP_K: usize = 8;

#[derive(Debug, Deserialize)]
pub struct GenerateQuestionsRequest {
    pub material_id: Option<String>,
    pub topic: String,
    #[serde(default = "default_num_questions")]
    pub num_questions: u8,
    #[serde(default = "default_difficulty")]
    pub difficulty: u8,
    #[serde(default = "default_student_level")]
    pub user_level: u8,
    #[serde(default)]
    pub use_rag: bool,
}

fn default_num_questions() -> u8 {
    1
}
fn default_difficulty() -> u8 {
    3
}
fn default_student_level() -> u8 {
    1
}

/// A Question view with the answer withheld; used for both generation and read endpoints.
#[derive(Debug, Serialize)]
pub struct QuestionView {
    pub id: String,
    pub vignette: String,
    pub options: Vec<String>,
    pub topic: String,
    pub subtopic: Option<String>,
    pub difficulty: u8,
}

impl From<Question> for QuestionView {
    fn from(question: Question) -> Self {
        Self {
            id: question.id,
            vignette: question.vignette,
            options: question.options,
            topic: question.topic,
            subtopic: question.subtopic,
            difficulty: question.predicted_difficulty,
        }
    }
}

async fn resolve_generation_model(config: &AppConfig) -> String {
    config
        .orchestrator_model_allowlist
        .first()
        .cloned()
        .unwrap_or_else(|| "default".to_string())
}

pub async fn generate_questions(
    State(state): State<ApiState>,
    OwnerId(owner_id): OwnerId,
    Json(request): Json<GenerateQuestionsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let material_ids = request.material_id.as_ref().map(std::slice::from_ref);

    let rag_context = if request.use_rag {
        let context = retrieve(
            state.embedder.as_ref(),
            &owner_id,
            &request.topic,
            RAG_TOP_K,
            material_ids,
            &state.db,
        )
        .await?;

        if context.is_empty() {
            None
        } else {
            Some((context.rendered, context.source_chunk_ids()))
        }
    } else {
        None
    };

    let (rag_text, source_chunk_ids) = match &rag_context {
        Some((text, ids)) => (Some(text.as_str()), Some(ids.clone())),
        None => (None, None),
    };

    let model = resolve_generation_model(&state.config).await;
    let params = GenerationRequestParams {
        owner_id: &owner_id,
        topic: &request.topic,
        difficulty: request.difficulty,
        n: request.num_questions,
        student_level: request.user_level,
        rag_context: rag_text,
        source_chunk_ids,
        model,
    };

    let generator = QuestionGenerator::new(&state.orchestrator);
    let questions = generator
        .generate(params, &state.db, CancellationToken::new())
        .await?;

    let views: Vec<QuestionView> = questions.into_iter().map(QuestionView::from).collect();
    Ok(Json(views))
}

pub async fn get_question(
    State(state): State<ApiState>,
    OwnerId(owner_id): OwnerId,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let question = Question::get_for_owner(&id, &owner_id, &state.db).await?;
    Ok(Json(QuestionView::from(question)))
}

#[derive(Debug, Deserialize)]
pub struct AnswerQuestionRequest {
    pub selected_index: u8,
    pub confidence: u8,
    pub time_taken_seconds: u32,
}

#[derive(Debug, Serialize)]
pub struct AnswerQuestionResponse {
    pub is_correct: bool,
    pub correct_index: u8,
    pub explanation: String,
    pub xp_earned: i64,
    pub next_review_date: chrono::DateTime<Utc>,
    pub review_status: String,
}

pub async fn answer_question(
    State(state): State<ApiState>,
    OwnerId(owner_id): OwnerId,
    Path(id): Path<String>,
    Json(request): Json<AnswerQuestionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let result = Grader::submit(
        &owner_id,
        &id,
        request.selected_index,
        request.confidence,
        request.time_taken_seconds,
        &state.db,
    )
    .await?;

    Ok(Json(AnswerQuestionResponse {
        is_correct: result.is_correct,
        correct_index: result.correct_index,
        explanation: result.explanation,
        xp_earned: result.xp_earned,
        next_review_date: result.next_review_date,
        review_status: format!("{:?}", result.review_status).to_lowercase(),
    }))
}

pub async fn due_reviews(
    State(state): State<ApiState>,
    OwnerId(owner_id): OwnerId,
) -> Result<impl IntoResponse, ApiError> {
    let due = due_queue(&owner_id, Utc::now(), &state.db).await?;
    Ok(Json(due))
}

pub async fn delete_question(
    State(state): State<ApiState>,
    OwnerId(owner_id): OwnerId,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Question::get_for_owner(&id, &owner_id, &state.db)
        .await
        .map_err(|err| match err {
            AppError::Ownership(_) => AppError::NotFound(id.clone()),
            other => other,
        })?;

    Question::delete(&id, &state.db).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
