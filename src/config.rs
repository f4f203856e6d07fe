//! Validated configuration schema (§4.8, §6).
//!
//! Configuration is parsed into a typed, validated record. An optional environment-variable
//! overlay (`SEMANTIC_CACHE_<FIELD>`) is applied before validation, so an env var can supply a
//! value the caller's programmatic default left unset.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Embedding provider selection for the pluggable vectorizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorizerProvider {
    Openai,
    Huggingface,
    Cohere,
    Vertexai,
    Voyageai,
}

/// Reranker provider selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankerProvider {
    Huggingface,
    Cohere,
    Voyageai,
}

/// L1 eviction strategy. See [`crate::eviction::EvictionPolicy`] for the runtime dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionStrategy {
    Recency,
    Frequency,
    Age,
}

impl Default for EvictionStrategy {
    fn default() -> Self {
        EvictionStrategy::Recency
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorizerConfig {
    pub provider: VectorizerProvider,
    pub model: String,
    #[serde(default)]
    pub api_config: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    #[serde(default)]
    pub enabled: bool,
    pub provider: RerankerProvider,
    pub model: String,
    #[serde(default = "default_rerank_limit")]
    pub limit: usize,
}

fn default_rerank_limit() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct L1CacheConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_l1_max_size")]
    pub max_size: usize,
    #[serde(default = "default_l1_ttl_seconds")]
    pub ttl_seconds: u64,
    #[serde(default)]
    pub eviction_strategy: EvictionStrategy,
}

fn default_l1_max_size() -> usize {
    1000
}

fn default_l1_ttl_seconds() -> u64 {
    300
}

impl Default for L1CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_size: default_l1_max_size(),
            ttl_seconds: default_l1_ttl_seconds(),
            eviction_strategy: EvictionStrategy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_true")]
    pub enable_detailed_metrics: bool,
    #[serde(default = "default_metrics_prefix")]
    pub metrics_prefix: String,
    #[serde(default)]
    pub enable_tracing: bool,
    #[serde(default)]
    pub tracing_exporter: Option<String>,
    #[serde(default)]
    pub tracing_endpoint: Option<String>,
    #[serde(default)]
    pub service_name: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_metrics_prefix() -> String {
    "semantic_cache".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enable_detailed_metrics: default_true(),
            metrics_prefix: default_metrics_prefix(),
            enable_tracing: false,
            tracing_exporter: None,
            tracing_endpoint: None,
            service_name: None,
        }
    }
}

/// Top-level, validated cache configuration.
///
/// Construct with [`CacheConfigBuilder`] or [`CacheConfig::from_env_overlay`]; both funnel
/// through [`CacheConfig::validate`], so an invalid combination can never be observed by the
/// rest of the crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub redis_url: String,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_ttl")]
    pub ttl: u64,
    /// Supersede near-duplicate entries at write time (§4.6.2). The exact-key case always
    /// overwrites regardless of this flag; this only controls whether a `store` for a
    /// semantically close but non-identical key deletes the closest existing match first.
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default = "default_distance_threshold")]
    pub distance_threshold: f32,
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    pub vectorizer: VectorizerConfig,
    #[serde(default)]
    pub reranker: Option<RerankerConfig>,

    #[serde(default)]
    pub l1_cache: L1CacheConfig,

    #[serde(default = "default_true")]
    pub enable_context_hashing: bool,
    #[serde(default = "default_context_fields")]
    pub context_fields: Vec<String>,
    #[serde(default)]
    pub context_hit_key_field: Option<String>,

    #[serde(default = "default_true")]
    pub enable_tags: bool,
    #[serde(default = "default_max_tags")]
    pub max_tags_per_entry: usize,

    #[serde(default)]
    pub enable_stale_while_revalidate: bool,
    #[serde(default)]
    pub stale_tolerance_seconds: u64,
    #[serde(default)]
    pub max_stale_age_seconds: Option<u64>,

    #[serde(default)]
    pub enable_version_checking: bool,
    #[serde(default = "default_cache_version")]
    pub cache_version: String,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default = "default_redis_timeout")]
    pub redis_timeout: Duration,
    #[serde(default = "default_embed_timeout")]
    pub embed_timeout: Duration,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_base_ms")]
    pub retry_backoff_base_ms: u64,
}

fn default_name() -> String {
    "semantic_cache".to_string()
}
fn default_ttl() -> u64 {
    3600
}
fn default_distance_threshold() -> f32 {
    0.2
}
fn default_top_k() -> usize {
    1
}
fn default_context_fields() -> Vec<String> {
    vec![
        "conversation_id".to_string(),
        "user_persona".to_string(),
        "session_id".to_string(),
    ]
}
fn default_max_tags() -> usize {
    10
}
fn default_cache_version() -> String {
    "v1".to_string()
}
fn default_redis_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_embed_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff_base_ms() -> u64 {
    100
}

impl CacheConfig {
    /// The effective max staleness age: `max_stale_age_seconds` if set, else `ttl` (§6).
    pub fn effective_max_stale_age(&self) -> u64 {
        self.max_stale_age_seconds.unwrap_or(self.ttl)
    }

    /// The scope attribute used as the metrics bucket key: `context_hit_key_field` if set, else
    /// the first entry of `context_fields` (§4.7).
    pub fn effective_context_hit_key_field(&self) -> Option<&str> {
        self.context_hit_key_field
            .as_deref()
            .or_else(|| self.context_fields.first().map(String::as_str))
    }

    /// The `context_fields` allowlist actually used for scope hashing/filtering: empty when
    /// `enable_context_hashing` is `false` (§6), so every request's scope subsets to the
    /// distinguished empty bucket and scope no longer discriminates cache entries — the crate's
    /// one escape hatch for callers who want `user_id`-only isolation without per-persona/
    /// per-conversation scoping.
    pub fn effective_context_fields(&self) -> &[String] {
        if self.enable_context_hashing {
            &self.context_fields
        } else {
            &[]
        }
    }

    /// Validates cross-field invariants not expressible as simple defaults. Called by both the
    /// builder and `from_env_overlay`.
    pub fn validate(&self) -> Result<()> {
        if self.redis_url.trim().is_empty() {
            return Err(CacheError::ConfigInvalid(
                "redis_url must not be empty".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.distance_threshold) {
            return Err(CacheError::ConfigInvalid(
                "distance_threshold must be within [0, 2] (cosine distance range)".to_string(),
            ));
        }
        if self.top_k == 0 {
            return Err(CacheError::ConfigInvalid(
                "top_k must be at least 1".to_string(),
            ));
        }
        if self.l1_cache.enabled && self.l1_cache.max_size == 0 {
            return Err(CacheError::ConfigInvalid(
                "l1_cache.max_size must be at least 1 when l1_cache.enabled".to_string(),
            ));
        }
        if let Some(reranker) = &self.reranker {
            if reranker.enabled && reranker.limit == 0 {
                return Err(CacheError::ConfigInvalid(
                    "reranker.limit must be at least 1 when reranker.enabled".to_string(),
                ));
            }
        }
        if self.max_retries == 0 && self.retry_backoff_base_ms > 0 {
            // not an error; backoff base is simply unused. No-op, documented for the reader.
        }
        Ok(())
    }

    /// Overlays `SEMANTIC_CACHE_<FIELD>` environment variables onto an already-built config,
    /// then validates. Only a handful of scalar fields are realistically supplied this way;
    /// unrecognized or malformed env vars are ignored rather than rejected, matching the
    /// "optional source of configuration" wording in SPEC_FULL.md §6.
    pub fn from_env_overlay(mut self) -> Result<Self> {
        if let Ok(v) = env::var("SEMANTIC_CACHE_REDIS_URL") {
            self.redis_url = v;
        }
        if let Ok(v) = env::var("SEMANTIC_CACHE_NAME") {
            self.name = v;
        }
        if let Ok(v) = env::var("SEMANTIC_CACHE_TTL") {
            if let Ok(parsed) = v.parse() {
                self.ttl = parsed;
            }
        }
        if let Ok(v) = env::var("SEMANTIC_CACHE_DISTANCE_THRESHOLD") {
            if let Ok(parsed) = v.parse() {
                self.distance_threshold = parsed;
            }
        }
        if let Ok(v) = env::var("SEMANTIC_CACHE_TOP_K") {
            if let Ok(parsed) = v.parse() {
                self.top_k = parsed;
            }
        }
        if let Ok(v) = env::var("SEMANTIC_CACHE_CACHE_VERSION") {
            self.cache_version = v;
        }
        self.validate()?;
        Ok(self)
    }
}

/// Builds a [`CacheConfig`], filling in every default from §6 and validating on `build`.
pub struct CacheConfigBuilder {
    redis_url: String,
    vectorizer: VectorizerConfig,
    name: String,
    ttl: u64,
    overwrite: bool,
    distance_threshold: f32,
    top_k: usize,
    reranker: Option<RerankerConfig>,
    l1_cache: L1CacheConfig,
    enable_context_hashing: bool,
    context_fields: Vec<String>,
    context_hit_key_field: Option<String>,
    enable_tags: bool,
    max_tags_per_entry: usize,
    enable_stale_while_revalidate: bool,
    stale_tolerance_seconds: u64,
    max_stale_age_seconds: Option<u64>,
    enable_version_checking: bool,
    cache_version: String,
    observability: ObservabilityConfig,
    redis_timeout: Duration,
    embed_timeout: Duration,
    max_retries: u32,
    retry_backoff_base_ms: u64,
}

impl CacheConfigBuilder {
    pub fn new(redis_url: impl Into<String>, vectorizer: VectorizerConfig) -> Self {
        Self {
            redis_url: redis_url.into(),
            vectorizer,
            name: default_name(),
            ttl: default_ttl(),
            overwrite: false,
            distance_threshold: default_distance_threshold(),
            top_k: default_top_k(),
            reranker: None,
            l1_cache: L1CacheConfig::default(),
            enable_context_hashing: true,
            context_fields: default_context_fields(),
            context_hit_key_field: None,
            enable_tags: true,
            max_tags_per_entry: default_max_tags(),
            enable_stale_while_revalidate: false,
            stale_tolerance_seconds: 0,
            max_stale_age_seconds: None,
            enable_version_checking: false,
            cache_version: default_cache_version(),
            observability: ObservabilityConfig::default(),
            redis_timeout: default_redis_timeout(),
            embed_timeout: default_embed_timeout(),
            max_retries: default_max_retries(),
            retry_backoff_base_ms: default_retry_backoff_base_ms(),
        }
    }

    pub fn ttl(mut self, ttl: u64) -> Self {
        self.ttl = ttl;
        self
    }

    /// When `true`, `store` deletes the nearest existing entry within `distance_threshold`
    /// (for the same user/scope) if it isn't the entry being written, instead of letting
    /// near-duplicate prompts accumulate side by side in L2.
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn distance_threshold(mut self, threshold: f32) -> Self {
        self.distance_threshold = threshold;
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn reranker(mut self, reranker: RerankerConfig) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn l1_cache(mut self, l1_cache: L1CacheConfig) -> Self {
        self.l1_cache = l1_cache;
        self
    }

    pub fn context_fields(mut self, fields: Vec<String>) -> Self {
        self.context_fields = fields;
        self
    }

    /// Disables scope hashing/filtering entirely (§6 `enable_context_hashing`): every request's
    /// scope subsets to the distinguished empty bucket regardless of `context_fields`, so only
    /// `user_id` (if supplied) still isolates entries.
    pub fn enable_context_hashing(mut self, enabled: bool) -> Self {
        self.enable_context_hashing = enabled;
        self
    }

    pub fn enable_tags(mut self, enabled: bool, max_tags_per_entry: usize) -> Self {
        self.enable_tags = enabled;
        self.max_tags_per_entry = max_tags_per_entry;
        self
    }

    pub fn stale_while_revalidate(mut self, tolerance_seconds: u64, max_stale_age: Option<u64>) -> Self {
        self.enable_stale_while_revalidate = true;
        self.stale_tolerance_seconds = tolerance_seconds;
        self.max_stale_age_seconds = max_stale_age;
        self
    }

    pub fn version_checking(mut self, version: impl Into<String>) -> Self {
        self.enable_version_checking = true;
        self.cache_version = version.into();
        self
    }

    pub fn build(self) -> Result<CacheConfig> {
        let config = CacheConfig {
            redis_url: self.redis_url,
            name: self.name,
            ttl: self.ttl,
            overwrite: self.overwrite,
            distance_threshold: self.distance_threshold,
            top_k: self.top_k,
            vectorizer: self.vectorizer,
            reranker: self.reranker,
            l1_cache: self.l1_cache,
            enable_context_hashing: self.enable_context_hashing,
            context_fields: self.context_fields,
            context_hit_key_field: self.context_hit_key_field,
            enable_tags: self.enable_tags,
            max_tags_per_entry: self.max_tags_per_entry,
            enable_stale_while_revalidate: self.enable_stale_while_revalidate,
            stale_tolerance_seconds: self.stale_tolerance_seconds,
            max_stale_age_seconds: self.max_stale_age_seconds,
            enable_version_checking: self.enable_version_checking,
            cache_version: self.cache_version,
            observability: self.observability,
            redis_timeout: self.redis_timeout,
            embed_timeout: self.embed_timeout,
            max_retries: self.max_retries,
            retry_backoff_base_ms: self.retry_backoff_base_ms,
        };
        config.validate()?;
        Ok(config)
    }
}
