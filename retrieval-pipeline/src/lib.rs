//! RAG retriever: embed a query, over-fetch candidate Chunks from the vector store, threshold
//! and re-rank for relevance/diversity, and render a citation-tagged context block.

pub mod mmr;
pub mod retriever;
pub mod scoring;

pub use retriever::{retrieve, CitedChunk, RetrievedContext};
