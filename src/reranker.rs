//! The optional reranker is an external collaborator (SPEC_FULL.md §1): `rerank(query,
//! candidates) -> ordered candidates` (§4.6.1 step 4). This crate defines the interface plus a
//! deterministic test double; real cross-encoder providers are supplied by the embedding
//! application.

use async_trait::async_trait;

use crate::backend::VectorMatch;
use crate::error::Result;

#[async_trait]
pub trait Reranker: Send + Sync {
    /// Returns `candidates` reordered best-first by cross-encoder score, truncated to `limit`.
    async fn rerank(&self, query: &str, candidates: Vec<VectorMatch>, limit: usize) -> Result<Vec<VectorMatch>>;
}

/// Orders candidates by how many whitespace-separated tokens they share with `query`,
/// descending, falling back to the existing (distance) order on ties. Deterministic and
/// dependency-free, for exercising the Cache Manager's "rerank when ≥2 candidates" branch
/// (§4.6.1 step 4) without a real cross-encoder.
#[derive(Default)]
pub struct TokenOverlapReranker;

#[async_trait]
impl Reranker for TokenOverlapReranker {
    async fn rerank(&self, query: &str, mut candidates: Vec<VectorMatch>, limit: usize) -> Result<Vec<VectorMatch>> {
        let query_lower = query.to_lowercase();
        candidates.sort_by(|a, b| {
            let score_a = overlap_score(&a.payload.prompt, &query_lower);
            let score_b = overlap_score(&b.payload.prompt, &query_lower);
            score_b
                .cmp(&score_a)
                .then_with(|| a.distance.partial_cmp(&b.distance).unwrap())
        });
        candidates.truncate(limit);
        Ok(candidates)
    }
}

fn overlap_score(candidate_prompt: &str, query_lower: &str) -> usize {
    let candidate_lower = candidate_prompt.to_lowercase();
    let candidate_tokens: std::collections::HashSet<&str> = candidate_lower.split_whitespace().collect();
    query_lower
        .split_whitespace()
        .filter(|t| candidate_tokens.contains(t))
        .count()
}
