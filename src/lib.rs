//! # Semantic Cache
//!
//! A two-tier semantic response cache for LLM applications: a bounded in-process L1 layer in
//! front of a pluggable, vector-search-backed L2 layer, coordinated by [`SemanticCache`].
//!
//! ## Features
//!
//! - **Semantic matching**: cache keys are derived from prompt embeddings plus a scope/user
//!   qualifier, so semantically similar prompts hit without exact-text matches.
//! - **Two-tier hierarchy**: L1 ([`L1Store`]) is a fast, bounded in-process map with recency,
//!   frequency, or age-based eviction; L2 ([`L2Backend`]) is a durable, pluggable vector store.
//!   Writes go through both; L1 may lag L2 but never leads it.
//! - **Staleness control**: a TTL/tolerance/hard-limit state machine decides whether to serve a
//!   candidate fresh, stale-but-acceptable, or discard it, with optional background refresh.
//! - **Tag invalidation**: entries can be tagged at write time and bulk-invalidated later by
//!   tag, with union or intersection semantics across multiple tags.
//! - **Metrics**: atomic counters for every layer, scope bucket, and tag, exposed as Prometheus
//!   text.
//!
//! ## Module Organization
//!
//! - [`config`] - validated configuration schema, builder, and environment overlay
//! - [`entry`] - the stored record shape (`CacheEntry`, `Scope`, `ScopeValue`)
//! - [`hash`] - the Key & Scope Hasher (`l1_key`, `scope_hash`, prompt normalization)
//! - [`eviction`] - the L1 Store and its three eviction policies
//! - [`backend`] - the `L2Backend` trait and an in-memory reference implementation
//! - [`tag_index`] - tag-to-entry-id reverse index, stored in L2
//! - [`vectorizer`] - the embedding capability interface
//! - [`reranker`] - the optional cross-encoder reranking capability interface
//! - [`staleness`] - the staleness state machine and background-refresh dedup
//! - [`metrics`] - the Metrics Registry and Prometheus exposition
//! - [`retry`] - exponential backoff with jitter for transient backend errors
//! - [`manager`] - [`SemanticCache`], the coordinator tying every module together
//! - [`error`] - the crate-wide error taxonomy

mod backend;
mod config;
mod entry;
mod error;
mod eviction;
mod hash;
mod manager;
mod metrics;
mod reranker;
mod retry;
mod staleness;
mod tag_index;
mod vectorizer;

pub use backend::{cosine_distance, Filters, InMemoryL2Backend, L2Backend, Payload, VectorMatch};
pub use config::{
    CacheConfig, CacheConfigBuilder, EvictionStrategy, L1CacheConfig, ObservabilityConfig,
    RerankerConfig, RerankerProvider, VectorizerConfig, VectorizerProvider,
};
pub use entry::{now_unix_seconds, CacheEntry, Metadata, Scope, ScopeValue};
pub use error::{CacheError, Result};
pub use eviction::{EvictionPolicy, L1Stats, L1Store};
pub use hash::{l1_key, scope_hash, L1Key};
pub use manager::{CheckResult, RefreshCallback, SemanticCache};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use reranker::{Reranker, TokenOverlapReranker};
pub use tag_index::TagIndex;
pub use vectorizer::{DeterministicTestVectorizer, Vectorizer};
