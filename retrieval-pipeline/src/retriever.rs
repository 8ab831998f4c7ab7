use std::collections::HashMap;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            chunk::{Chunk, ChunkSearchResult},
            material::Material,
        },
    },
    utils::embedding::Embedder,
};

use crate::mmr::mmr_select;

/// Similarity below this threshold is treated as irrelevant and dropped before re-ranking.
const SIMILARITY_THRESHOLD: f32 = 0.5;

/// MMR relevance/diversity tradeoff; higher favors relevance over diversification.
const MMR_LAMBDA: f32 = 0.7;

/// Over-fetch factor applied to `top_k` before thresholding and re-ranking.
const OVERFETCH_FACTOR: usize = 2;

#[derive(Debug, Clone)]
pub struct CitedChunk {
    pub citation_index: usize,
    pub chunk: Chunk,
    pub score: f32,
    pub source_file_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RetrievedContext {
    pub chunks: Vec<CitedChunk>,
    pub rendered: String,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn source_chunk_ids(&self) -> Vec<String> {
        self.chunks.iter().map(|c| c.chunk.id.clone()).collect()
    }
}

/// Embeds `query`, searches the vector store, thresholds, MMR-reranks, and renders a
/// citation-tagged context block. Returns an empty `RetrievedContext` (not an error) when no
/// chunk clears the similarity threshold.
pub async fn retrieve(
    embedder: &dyn Embedder,
    owner_id: &str,
    query: &str,
    top_k: usize,
    material_ids: Option<&[String]>,
    db: &SurrealDbClient,
) -> Result<RetrievedContext, AppError> {
    let query_embedding = embedder.embed(query).await?;

    let overfetch_k = top_k.saturating_mul(OVERFETCH_FACTOR).max(top_k);
    let candidates = Chunk::vector_search(owner_id, &query_embedding, overfetch_k, material_ids, db).await?;

    let thresholded: Vec<ChunkSearchResult> = candidates
        .into_iter()
        .filter(|c| c.score >= SIMILARITY_THRESHOLD)
        .collect();

    if thresholded.is_empty() {
        return Ok(RetrievedContext {
            chunks: Vec::new(),
            rendered: String::new(),
        });
    }

    let selected = mmr_select(thresholded, MMR_LAMBDA, top_k);

    let mut file_names: HashMap<String, Option<String>> = HashMap::new();
    let mut cited = Vec::with_capacity(selected.len());

    for (position, result) in selected.into_iter().enumerate() {
        let material_id = result.chunk.material_id.clone();
        let file_name = match file_names.get(&material_id) {
            Some(cached) => cached.clone(),
            None => {
                let fetched = db
                    .get_item::<Material>(&material_id)
                    .await?
                    .map(|m| m.file_name);
                file_names.insert(material_id, fetched.clone());
                fetched
            }
        };

        cited.push(CitedChunk {
            citation_index: position + 1,
            score: result.score,
            source_file_name: file_name,
            chunk: result.chunk,
        });
    }

    let rendered = render_context(&cited);

    Ok(RetrievedContext {
        chunks: cited,
        rendered,
    })
}

/// Renders each cited chunk as `[S{i}] source (p. N)\ntext`, blocks separated by blank lines.
fn render_context(chunks: &[CitedChunk]) -> String {
    chunks
        .iter()
        .map(|c| {
            let mut header = format!("[S{}]", c.citation_index);
            if let Some(name) = &c.source_file_name {
                header.push(' ');
                header.push_str(name);
            }
            if let Some(page) = c.chunk.page_hint {
                header.push_str(&format!(" (p. {page})"));
            }
            format!("{header}\n{}", c.chunk.text)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
