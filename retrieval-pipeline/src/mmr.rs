use common::storage::types::chunk::ChunkSearchResult;

use crate::scoring::clamp_unit;

/// Cosine similarity between two equal-length embedding vectors. Returns 0.0 for a
/// degenerate (zero-magnitude) input rather than dividing by zero.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    clamp_unit(dot / (norm_a * norm_b))
}

/// Greedy maximal-marginal-relevance selection over an over-fetched candidate pool.
/// `lambda` trades relevance (1.0) against diversity (0.0) from already-selected chunks.
/// Ties in MMR score break on ascending chunk id for determinism.
pub fn mmr_select(candidates: Vec<ChunkSearchResult>, lambda: f32, top_k: usize) -> Vec<ChunkSearchResult> {
    let mut remaining = candidates;
    let mut selected: Vec<ChunkSearchResult> = Vec::with_capacity(top_k.min(remaining.len()));

    while selected.len() < top_k && !remaining.is_empty() {
        let mut best_index = 0;
        let mut best_score = f32::MIN;

        for (index, candidate) in remaining.iter().enumerate() {
            let max_sim_to_selected = selected
                .iter()
                .map(|s| cosine_similarity(&candidate.chunk.embedding, &s.chunk.embedding))
                .fold(0.0f32, f32::max);

            let mmr_score = lambda * candidate.score - (1.0 - lambda) * max_sim_to_selected;

            let is_better = mmr_score > best_score
                || ((mmr_score - best_score).abs() < f32::EPSILON
                    && candidate.chunk.id < remaining[best_index].chunk.id);

            if is_better {
                best_score = mmr_score;
                best_index = index;
            }
        }

        selected.push(remaining.remove(best_index));
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::chunk::Chunk;

    fn chunk_with(id_suffix: &str, embedding: Vec<f32>, score: f32) -> ChunkSearchResult {
        let mut chunk = Chunk::new(
            "mat-1".to_string(),
            "owner-1".to_string(),
            0,
            0,
            10,
            None,
            format!("text {id_suffix}"),
            embedding,
            None,
        );
        chunk.id = format!("chunk-{id_suffix}");
        ChunkSearchResult { chunk, score }
    }

    #[test]
    fn picks_the_most_relevant_candidate_first() {
        let candidates = vec![
            chunk_with("a", vec![1.0, 0.0], 0.9),
            chunk_with("b", vec![0.0, 1.0], 0.5),
        ];
        let selected = mmr_select(candidates, 0.7, 2);
        assert_eq!(selected[0].chunk.id, "chunk-a");
    }

    #[test]
    fn penalizes_near_duplicate_candidates() {
        let candidates = vec![
            chunk_with("a", vec![1.0, 0.0], 0.9),
            chunk_with("b", vec![1.0, 0.0], 0.89),
            chunk_with("c", vec![0.0, 1.0], 0.6),
        ];
        let selected = mmr_select(candidates, 0.5, 2);
        let ids: Vec<_> = selected.iter().map(|s| s.chunk.id.clone()).collect();
        assert!(ids.contains(&"chunk-a".to_string()));
        assert!(ids.contains(&"chunk-c".to_string()));
    }

    #[test]
    fn never_returns_more_than_top_k() {
        let candidates = vec![
            chunk_with("a", vec![1.0, 0.0], 0.9),
            chunk_with("b", vec![0.0, 1.0], 0.5),
            chunk_with("c", vec![0.5, 0.5], 0.4),
        ];
        let selected = mmr_select(candidates, 0.7, 1);
        assert_eq!(selected.len(), 1);
    }
}
