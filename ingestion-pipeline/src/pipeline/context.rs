use common::{error::AppError, storage::{db::SurrealDbClient, types::material::Material}};
use tracing::error;

use super::{chunking::ChunkCandidate, config::IngestionConfig, parsing::ParsedSegment, services::PipelineServices};

/// The normalized full text of a Material plus the byte ranges each parsed segment occupies
/// within it, used to recover a `page_hint` once the text has been re-chunked across segment
/// boundaries.
pub struct PreparedContent {
    pub full_text: String,
    pub segment_ranges: Vec<(usize, usize, Option<u32>)>,
}

impl PreparedContent {
    /// Page hint of whichever segment range contains `offset`, or the last segment's hint if
    /// `offset` lands exactly at the end of the text.
    pub fn page_hint_at(&self, offset: usize) -> Option<u32> {
        self.segment_ranges
            .iter()
            .find(|(start, end, _)| offset >= *start && offset < *end)
            .or_else(|| self.segment_ranges.last())
            .and_then(|(_, _, hint)| *hint)
    }
}

fn join_segments(segments: Vec<ParsedSegment>) -> PreparedContent {
    let mut full_text = String::new();
    let mut segment_ranges = Vec::with_capacity(segments.len());

    for segment in segments {
        if !full_text.is_empty() {
            full_text.push_str("\n\n");
        }
        let start = full_text.len();
        full_text.push_str(&segment.text);
        let end = full_text.len();
        segment_ranges.push((start, end, segment.page_hint));
    }

    PreparedContent { full_text, segment_ranges }
}

/// A chunk candidate paired with the embedding produced for it, ready for persistence.
pub struct EmbeddedChunk {
    pub candidate: ChunkCandidate,
    pub page_hint: Option<u32>,
    pub embedding: Vec<f32>,
}

pub struct PipelineContext<'a> {
    pub material: &'a Material,
    pub db: &'a SurrealDbClient,
    pub pipeline_config: &'a IngestionConfig,
    pub services: &'a dyn PipelineServices,
    prepared: Option<PreparedContent>,
    chunks: Vec<(ChunkCandidate, Option<u32>)>,
    embedded: Vec<EmbeddedChunk>,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        material: &'a Material,
        db: &'a SurrealDbClient,
        pipeline_config: &'a IngestionConfig,
        services: &'a dyn PipelineServices,
    ) -> Self {
        Self {
            material,
            db,
            pipeline_config,
            services,
            prepared: None,
            chunks: Vec::new(),
            embedded: Vec::new(),
        }
    }

    pub fn set_prepared(&mut self, segments: Vec<ParsedSegment>) {
        self.prepared = Some(join_segments(segments));
    }

    pub fn prepared(&self) -> Result<&PreparedContent, AppError> {
        self.prepared
            .as_ref()
            .ok_or_else(|| AppError::Ingestion("prepared content expected to be available".into()))
    }

    pub fn set_chunks(&mut self, chunks: Vec<(ChunkCandidate, Option<u32>)>) {
        self.chunks = chunks;
    }

    pub fn take_chunks(&mut self) -> Vec<(ChunkCandidate, Option<u32>)> {
        std::mem::take(&mut self.chunks)
    }

    pub fn set_embedded(&mut self, embedded: Vec<EmbeddedChunk>) {
        self.embedded = embedded;
    }

    pub fn take_embedded(&mut self) -> Vec<EmbeddedChunk> {
        std::mem::take(&mut self.embedded)
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        error!(material_id = %self.material.id, error = %err, "ingestion pipeline aborted");
        err
    }
}
