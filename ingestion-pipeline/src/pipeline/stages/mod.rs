use common::storage::types::chunk::Chunk;
use state_machines::core::GuardError;
use tracing::debug;

use common::error::AppError;

use super::{
    chunking::chunk_text,
    context::{EmbeddedChunk, PipelineContext},
    parsing::parse_segments,
    state::{Chunked, ContentPrepared, Embedded, IngestionMachine, Persisted, Ready},
};

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::Ingestion(format!("invalid ingestion pipeline transition during {event}: {guard:?}"))
}

/// Loads the Material's stored bytes and parses them into normalized text segments.
#[tracing::instrument(level = "trace", skip_all, fields(material_id = %ctx.material.id))]
pub async fn prepare_content(
    machine: IngestionMachine<(), Ready>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), ContentPrepared>, AppError> {
    let bytes = ctx.services.load_bytes(&ctx.material.storage_path).await?;
    let segments = parse_segments(&bytes, &ctx.material.content_type)?;

    debug!(
        material_id = %ctx.material.id,
        segment_count = segments.len(),
        "ingestion content parsed"
    );

    ctx.set_prepared(segments);

    machine.prepare().map_err(|(_, guard)| map_guard_error("prepare", &guard))
}

/// Splits the prepared text into token-bounded chunk candidates, each carrying a page hint
/// recovered from the segment it falls inside.
#[tracing::instrument(level = "trace", skip_all, fields(material_id = %ctx.material.id))]
pub async fn chunk(
    machine: IngestionMachine<(), ContentPrepared>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Chunked>, AppError> {
    let tuning = &ctx.pipeline_config.tuning;
    let prepared = ctx.prepared()?;

    let candidates = chunk_text(
        &prepared.full_text,
        tuning.chunk_target_tokens,
        tuning.chunk_overlap_tokens,
        &ctx.pipeline_config.tokenizer_name,
    )?;

    if candidates.is_empty() {
        return Err(AppError::Ingestion("material produced no chunks".into()));
    }

    let tagged = candidates
        .into_iter()
        .map(|candidate| {
            let page_hint = prepared.page_hint_at(candidate.char_start);
            (candidate, page_hint)
        })
        .collect::<Vec<_>>();

    debug!(material_id = %ctx.material.id, chunk_count = tagged.len(), "ingestion content chunked");

    ctx.set_chunks(tagged);

    machine.chunk().map_err(|(_, guard)| map_guard_error("chunk", &guard))
}

/// Embeds every chunk in order, retrying transient embedder failures; reordering never
/// happens so insertion order matches the source text's ordinal.
#[tracing::instrument(level = "trace", skip_all, fields(material_id = %ctx.material.id))]
pub async fn embed(
    machine: IngestionMachine<(), Chunked>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Embedded>, AppError> {
    let tuning = &ctx.pipeline_config.tuning;
    let candidates = ctx.take_chunks();

    let mut embedded = Vec::with_capacity(candidates.len());
    for (candidate, page_hint) in candidates {
        let embedding = ctx.services.embed_with_retry(&candidate.text, tuning).await?;
        embedded.push(EmbeddedChunk {
            candidate,
            page_hint,
            embedding,
        });
    }

    debug!(material_id = %ctx.material.id, embedded_count = embedded.len(), "ingestion chunks embedded");

    ctx.set_embedded(embedded);

    machine.embed().map_err(|(_, guard)| map_guard_error("embed", &guard))
}

/// Replaces any chunks left over from a prior failed run and marks the Material completed
/// with its final chunk count, in one transaction: a crash partway through can never leave
/// chunks persisted against a Material still `processing`, or a Material marked completed
/// with a stale chunk set.
#[tracing::instrument(level = "trace", skip_all, fields(material_id = %ctx.material.id))]
pub async fn persist(
    machine: IngestionMachine<(), Embedded>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Persisted>, AppError> {
    let embedded = ctx.take_embedded();

    let chunks: Vec<Chunk> = embedded
        .into_iter()
        .enumerate()
        .map(|(ordinal, item)| {
            Chunk::new(
                ctx.material.id.clone(),
                ctx.material.owner_id.clone(),
                ordinal as u32,
                item.candidate.char_start,
                item.candidate.char_end,
                item.page_hint,
                item.candidate.text,
                item.embedding,
                None,
            )
        })
        .collect();

    let chunk_count = chunks.len();
    Chunk::replace_for_material(&ctx.material.id, chunks, ctx.db).await?;

    debug!(material_id = %ctx.material.id, chunk_count, "ingestion persisted");

    machine.persist().map_err(|(_, guard)| map_guard_error("persist", &guard))
}
