//! L2 Backend Adapter (§4.3): an abstract contract over a vector-search-capable store, plus an
//! in-memory reference implementation for tests and small deployments.
//!
//! Grounded in `llmspell-storage`'s `VectorStorage` trait shape (`async_trait`, scope/filter
//! aware `insert`/`search`/`delete`), narrowed to the exact operation set §4.3 specifies.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::Result;

/// Equality predicates applied during `vector_search` and, conceptually, available for any
/// future scan-based backend operation (§4.3: "Filters are equality predicates on `user_id`,
/// `scope_hash`, and `version`").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filters {
    pub user_id: Option<String>,
    pub scope_hash: Option<String>,
    pub version: Option<String>,
}

impl Filters {
    fn matches(&self, payload: &Payload) -> bool {
        if let Some(user_id) = &self.user_id {
            if payload.user_id.as_deref() != Some(user_id.as_str()) {
                return false;
            }
        }
        if let Some(scope_hash) = &self.scope_hash {
            if payload.scope_hash.as_deref() != Some(scope_hash.as_str()) {
                return false;
            }
        }
        if let Some(version) = &self.version {
            if payload.version != *version {
                return false;
            }
        }
        true
    }
}

/// The non-vector fields stored alongside an embedding (§4.3, §6 "Persisted state layout").
#[derive(Debug, Clone)]
pub struct Payload {
    pub response: String,
    pub prompt: String,
    pub metadata: serde_json::Value,
    pub created_at: u64,
    pub ttl_seconds: u64,
    pub version: String,
    pub user_id: Option<String>,
    pub scope_hash: Option<String>,
    pub tags: Vec<String>,
}

/// One `vector_search` result: the matched entry id, its cosine distance from the query
/// (scaled to `[0, 2]`, §4.3), and its payload.
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub entry_id: String,
    pub distance: f32,
    pub payload: Payload,
}

/// Abstract contract over a vector-search-capable store (§4.3). Implementations are expected to
/// apply their own retry/timeout policy internally or surface `BackendTransient`/
/// `BackendUnavailable`/`Timeout` for the Cache Manager's retry wrapper (§5 "Retries") to handle.
#[async_trait]
pub trait L2Backend: Send + Sync {
    /// Upserts an entry's embedding and payload.
    async fn index_add(&self, entry_id: &str, embedding: Vec<f32>, payload: Payload) -> Result<()>;

    /// Returns matches with distance <= `distance_threshold`, ordered by increasing distance,
    /// at most `k` of them.
    async fn vector_search(
        &self,
        embedding: &[f32],
        filters: &Filters,
        k: usize,
        distance_threshold: f32,
    ) -> Result<Vec<VectorMatch>>;

    async fn delete(&self, entry_id: &str) -> Result<()>;

    async fn exists(&self, entry_id: &str) -> Result<bool>;

    /// Tag Index primitive: adds `member` to the set named `set_name` (§4.2, §6: tag sets are
    /// stored as `<name>:tag:<tag_value>` containers of entry_ids).
    async fn set_member_add(&self, set_name: &str, member: &str) -> Result<()>;

    async fn set_member_remove(&self, set_name: &str, member: &str) -> Result<()>;

    async fn set_read(&self, set_name: &str) -> Result<HashSet<String>>;

    async fn set_clear(&self, set_name: &str) -> Result<()>;
}

/// Cosine distance scaled to `[0, 2]`: `1 - cosine_similarity`, matching §4.3's "scaled to
/// `[0, 2]`" phrasing (cosine similarity ranges `[-1, 1]`, so `1 - similarity` ranges `[0, 2]`).
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 2.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 2.0;
    }
    let similarity = (dot / (norm_a * norm_b)).clamp(-1.0, 1.0);
    1.0 - similarity
}

struct Record {
    embedding: Vec<f32>,
    payload: Payload,
}

/// Linear-scan, in-memory reference implementation of [`L2Backend`] (§4.3). Suitable for tests
/// and small deployments; production backends (a real vector database) are supplied by the
/// embedding application, per the crate's "pluggable providers" design (SPEC_FULL.md §9).
#[derive(Default)]
pub struct InMemoryL2Backend {
    records: RwLock<HashMap<String, Record>>,
    sets: RwLock<HashMap<String, HashSet<String>>>,
}

impl InMemoryL2Backend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl L2Backend for InMemoryL2Backend {
    async fn index_add(&self, entry_id: &str, embedding: Vec<f32>, payload: Payload) -> Result<()> {
        self.records
            .write()
            .insert(entry_id.to_string(), Record { embedding, payload });
        Ok(())
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        filters: &Filters,
        k: usize,
        distance_threshold: f32,
    ) -> Result<Vec<VectorMatch>> {
        let records = self.records.read();
        let mut matches: Vec<VectorMatch> = records
            .iter()
            .filter(|(_, record)| filters.matches(&record.payload))
            .map(|(entry_id, record)| VectorMatch {
                entry_id: entry_id.clone(),
                distance: cosine_distance(embedding, &record.embedding),
                payload: record.payload.clone(),
            })
            .filter(|m| m.distance <= distance_threshold)
            .collect();
        matches.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap());
        matches.truncate(k);
        Ok(matches)
    }

    async fn delete(&self, entry_id: &str) -> Result<()> {
        self.records.write().remove(entry_id);
        Ok(())
    }

    async fn exists(&self, entry_id: &str) -> Result<bool> {
        Ok(self.records.read().contains_key(entry_id))
    }

    async fn set_member_add(&self, set_name: &str, member: &str) -> Result<()> {
        self.sets
            .write()
            .entry(set_name.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_member_remove(&self, set_name: &str, member: &str) -> Result<()> {
        if let Some(set) = self.sets.write().get_mut(set_name) {
            set.remove(member);
        }
        Ok(())
    }

    async fn set_read(&self, set_name: &str) -> Result<HashSet<String>> {
        Ok(self.sets.read().get(set_name).cloned().unwrap_or_default())
    }

    async fn set_clear(&self, set_name: &str) -> Result<()> {
        self.sets.write().remove(set_name);
        Ok(())
    }
}
