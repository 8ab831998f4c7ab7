use std::{pin::Pin, time::Duration};

use async_stream::stream;
use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, KeepAliveStream},
        IntoResponse, Sse,
    },
    Json,
};
use common::{
    error::AppError,
    storage::types::{
        conversation::Conversation,
        message::{format_history, Message, MessageRole, RetrievedContextItem},
    },
};
use futures::{Stream, StreamExt};
use orchestrator::{Effort, GenerationRequest, Verbosity};
use retrieval_pipeline::retrieve;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::{api_state::ApiState, error::ApiError, middleware_api_auth::OwnerId};

/// How many prior messages are folded into the prompt, most recent turns only.
const HISTORY_WINDOW: usize = 5;
/// Rough token-to-character proxy used to keep the folded history within budget without
/// pulling a tokenizer dependency into this crate.
const HISTORY_CHAR_BUDGET: usize = 16_000;
/// A delta that can't be pushed onto the outbound channel within this window stalls the
/// client; the turn is cancelled and ends as interrupted rather than hanging indefinitely.
const BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(2);
const RAG_TOP_K: usize = 8;

type EventStream = Pin<Box<dyn Stream<Item = Result<Event, axum::Error>> + Send>>;
type SseResponse = Sse<KeepAliveStream<EventStream>>;

fn sse_with_keep_alive(stream: EventStream) -> SseResponse {
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keep-alive"))
}

fn json_event(event_name: &'static str, payload: &impl Serialize) -> Event {
    match serde_json::to_string(payload) {
        Ok(body) => Event::default().event(event_name).data(body),
        Err(_) => Event::default().event("error").data("{\"code\":\"internal\",\"message\":\"failed to encode event\"}"),
    }
}

fn error_stream(code: &'static str, message: impl Into<String>) -> EventStream {
    let payload = ErrorPayload {
        code: code.to_string(),
        message: message.into(),
    };
    futures::stream::once(async move { Ok(json_event("error", &payload)) }).boxed()
}

#[derive(Debug, Serialize)]
struct ErrorPayload {
    code: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct EndPayload {
    citations: Vec<String>,
    interrupted: bool,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub reasoning_effort: Option<String>,
    #[serde(default)]
    pub verbosity: Option<String>,
    #[serde(default)]
    pub use_rag: bool,
    #[serde(default)]
    pub model: Option<String>,
}

fn clamp_effort(raw: Option<&str>) -> Effort {
    match raw.map(str::to_lowercase).as_deref() {
        Some("medium") => Effort::Medium,
        Some("high") => Effort::High,
        _ => Effort::Low,
    }
}

fn clamp_verbosity(raw: Option<&str>) -> Verbosity {
    match raw.map(str::to_lowercase).as_deref() {
        Some("low") => Verbosity::Low,
        Some("high") => Verbosity::High,
        _ => Verbosity::Medium,
    }
}

/// Trims formatted history to the trailing slice that fits the character budget, keeping
/// the most recent turns and dropping the oldest first.
fn trim_history(rendered: &str) -> &str {
    if rendered.len() <= HISTORY_CHAR_BUDGET {
        return rendered;
    }
    let start = rendered.len() - HISTORY_CHAR_BUDGET;
    let boundary = rendered[start..]
        .char_indices()
        .next()
        .map_or(rendered.len(), |(offset, _)| start + offset);
    &rendered[boundary..]
}

fn assemble_prompt(history: &[Message], rag_context: Option<&str>, new_content: &str) -> String {
    let preamble = "You are a medical education tutor. Answer the student's question clearly, \
         citing source material by its [S1], [S2]... tags when context is provided. If no \
         context is provided, answer from general medical knowledge and say so when relevant.";

    let context_block = match rag_context {
        Some(context) if !context.trim().is_empty() => format!("Source material context:\n{context}"),
        _ => "No source material context was provided for this turn.".to_string(),
    };

    let recent = history.iter().rev().take(HISTORY_WINDOW).rev().cloned().collect::<Vec<_>>();
    let rendered_history = format_history(&recent);
    let trimmed_history = trim_history(&rendered_history);

    format!(
        "{preamble}\n\n{context_block}\n\nConversation so far:\n{trimmed_history}\n\nUser: {new_content}"
    )
}

async fn forward_deltas(
    mut generation: orchestrator::GenerationStream,
    tx: tokio::sync::mpsc::Sender<Result<Event, axum::Error>>,
) -> (String, bool) {
    let mut collected = String::new();
    let mut interrupted = false;

    while let Some(item) = generation.next_delta().await {
        match item {
            Ok(text) => {
                collected.push_str(&text);
                let event = Event::default().event("delta").data(text);
                if timeout(BACKPRESSURE_TIMEOUT, tx.send(Ok(event))).await.is_err() {
                    generation.cancel();
                    interrupted = true;
                    break;
                }
            }
            Err(err) => {
                if err.is_cancelled() {
                    interrupted = true;
                } else {
                    let _ = tx
                        .send(Ok(json_event(
                            "error",
                            &ErrorPayload {
                                code: "upstream".to_string(),
                                message: err.to_string(),
                            },
                        )))
                        .await;
                }
                break;
            }
        }
    }

    (collected, interrupted)
}

/// Streams one chat turn over SSE: validates and clamps generation parameters, appends the
/// user message, optionally retrieves RAG context, forwards the orchestrator's deltas, and
/// persists the assistant's reply (partial and flagged `interrupted` if cancelled).
pub async fn send_message(
    State(state): State<ApiState>,
    OwnerId(owner_id): OwnerId,
    Path(conversation_id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> SseResponse {
    let (_conversation, history) =
        match Conversation::get_complete_conversation(&conversation_id, &owner_id, &state.db).await {
            Ok(result) => result,
            Err(AppError::Ownership(_) | AppError::NotFound(_)) => {
                return sse_with_keep_alive(error_stream("not_found", "conversation not found"))
            }
            Err(err) => return sse_with_keep_alive(error_stream("internal", err.to_string())),
        };

    let Some(cancel) = state.conversation_turns.begin(&conversation_id).await else {
        return sse_with_keep_alive(futures::stream::once(async { Ok(Event::default().event("busy").data("{}")) }).boxed());
    };

    let effort = clamp_effort(request.reasoning_effort.as_deref());
    let verbosity = clamp_verbosity(request.verbosity.as_deref());
    let model = request
        .model
        .unwrap_or_else(|| state.config.orchestrator_model_allowlist.first().cloned().unwrap_or_else(|| "default".to_string()));

    let user_message = Message::new(conversation_id.clone(), MessageRole::User, request.content.clone(), None);
    if let Err(err) = state.db.store_item(user_message.clone()).await {
        state.conversation_turns.end(&conversation_id).await;
        return sse_with_keep_alive(error_stream("internal", AppError::Database(err).to_string()));
    }

    let rag = if request.use_rag {
        match retrieve(state.embedder.as_ref(), &owner_id, &request.content, RAG_TOP_K, None, &state.db).await {
            Ok(context) if !context.is_empty() => Some(context),
            Ok(_) => None,
            Err(err) => {
                state.conversation_turns.end(&conversation_id).await;
                return sse_with_keep_alive(error_stream("retrieval", err.to_string()));
            }
        }
    } else {
        None
    };

    let retrieved_context: Option<Vec<RetrievedContextItem>> = rag.as_ref().map(|context| {
        context
            .chunks
            .iter()
            .map(|c| RetrievedContextItem {
                chunk_id: c.chunk.id.clone(),
                similarity: c.score,
            })
            .collect()
    });
    let citations = retrieved_context
        .as_ref()
        .map(|items| items.iter().map(|item| item.chunk_id.clone()).collect::<Vec<_>>())
        .unwrap_or_default();

    let prompt = assemble_prompt(&history, rag.as_ref().map(|c| c.rendered.as_str()), &request.content);

    let generation_request = GenerationRequest {
        user_id: owner_id.clone(),
        model,
        effort,
        verbosity,
        prompt,
    };

    let generation = match state.orchestrator.stream(generation_request, cancel).await {
        Ok(stream) => stream,
        Err(err) => {
            state.conversation_turns.end(&conversation_id).await;
            return sse_with_keep_alive(error_stream("upstream", err.to_string()));
        }
    };

    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Event, axum::Error>>(64);
    let db = std::sync::Arc::clone(&state.db);
    let turns = state.conversation_turns.clone();

    tokio::spawn(async move {
        let (content, interrupted) = forward_deltas(generation, tx.clone()).await;

        let assistant_message = if interrupted {
            Message::new_interrupted(conversation_id.clone(), content, retrieved_context)
        } else {
            Message::new(conversation_id.clone(), MessageRole::Assistant, content, retrieved_context)
        };

        if let Err(err) = db.store_item(assistant_message).await {
            tracing::error!(error = %err, "failed to persist assistant message");
        }
        if let Err(err) = Conversation::touch_last_message_at(&conversation_id, &db).await {
            tracing::error!(error = %err, "failed to touch conversation timestamp");
        }

        let _ = tx
            .send(Ok(json_event("end", &EndPayload { citations, interrupted })))
            .await;

        turns.end(&conversation_id).await;
    });

    let conversation_stream = tokio_stream_from_receiver(rx);
    sse_with_keep_alive(conversation_stream.boxed())
}

fn tokio_stream_from_receiver(
    rx: tokio::sync::mpsc::Receiver<Result<Event, axum::Error>>,
) -> impl Stream<Item = Result<Event, axum::Error>> {
    stream! {
        let mut rx = rx;
        while let Some(item) = rx.recv().await {
            yield item;
        }
    }
}

/// Cancels the in-flight generation for a conversation, if one is running.
pub async fn cancel_message(
    State(state): State<ApiState>,
    OwnerId(owner_id): OwnerId,
    Path(conversation_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Conversation::get_complete_conversation(&conversation_id, &owner_id, &state.db).await?;

    let cancelled = state.conversation_turns.cancel(&conversation_id).await;
    Ok(Json(serde_json::json!({ "cancelled": cancelled })))
}
