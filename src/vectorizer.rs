//! The embedding model (vectorizer) is an external collaborator (SPEC_FULL.md §1): this crate
//! only defines the capability interface plus a deterministic reference implementation used in
//! tests, grounded in `llmspell-storage`'s `async_trait` capability-trait pattern.

use async_trait::async_trait;

use crate::error::Result;

/// `embed(text) -> vector` (§1, §9). Production implementations call out to OpenAI/HuggingFace/
/// Cohere/VertexAI/VoyageAI per [`crate::config::VectorizerProvider`]; none are shipped here.
#[async_trait]
pub trait Vectorizer: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// A deterministic, dependency-free embedding used by this crate's own tests: hashes
/// whitespace-separated tokens into a fixed-width bag-of-words vector, normalized. Two prompts
/// sharing vocabulary land close together in cosine distance without requiring a real model —
/// good enough to exercise the Cache Manager's control flow, not a quality embedding.
pub struct DeterministicTestVectorizer {
    dimensions: usize,
}

impl DeterministicTestVectorizer {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for DeterministicTestVectorizer {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl Vectorizer for DeterministicTestVectorizer {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text.to_lowercase().split_whitespace() {
            let bucket = (fnv1a(token) as usize) % self.dimensions;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

fn fnv1a(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in s.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}
