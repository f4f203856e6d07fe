//! Data model (§3): [`Scope`], [`ScopeValue`], and [`CacheEntry`].

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A scalar scope attribute value. Kept narrow (string/int/bool) rather than arbitrary JSON so
/// canonical serialization for hashing (§4.4) is unambiguous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScopeValue {
    Text(String),
    Int(i64),
    Bool(bool),
}

impl std::fmt::Display for ScopeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeValue::Text(s) => write!(f, "{s}"),
            ScopeValue::Int(i) => write!(f, "{i}"),
            ScopeValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for ScopeValue {
    fn from(s: &str) -> Self {
        ScopeValue::Text(s.to_string())
    }
}

impl From<String> for ScopeValue {
    fn from(s: String) -> Self {
        ScopeValue::Text(s)
    }
}

/// Caller-supplied scoping attributes. Only attributes named in `context_fields` are honored;
/// everything else is ignored by [`crate::hash::scope_subset`] (§3).
pub type Scope = BTreeMap<String, ScopeValue>;

/// Free-form, caller-provided metadata attached to an entry (§3). Kept as a JSON value so the
/// crate stays agnostic to the caller's schema.
pub type Metadata = serde_json::Value;

/// Seconds since the Unix epoch. The crate treats this as "monotonic wall time" per §3 — callers
/// are expected not to move their system clock backwards mid-run; staleness comparisons never
/// see negative durations in that case.
pub fn now_unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs()
}

/// A stored cache record (§3). Carried end-to-end between L1 and L2; L1 additionally tracks
/// `access_count`/`last_access_at` for eviction (§4.1), L2 is the durable copy of everything
/// else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub entry_id: String,
    pub prompt: String,
    pub response: String,
    pub user_id: Option<String>,
    pub scope_hash: Option<String>,
    pub tags: Vec<String>,
    pub metadata: Metadata,
    pub created_at: u64,
    pub ttl_seconds: u64,
    pub version: String,
    pub access_count: u64,
    pub last_access_at: u64,
}

impl CacheEntry {
    pub fn new(
        entry_id: String,
        prompt: String,
        response: String,
        user_id: Option<String>,
        scope_hash: Option<String>,
        tags: Vec<String>,
        metadata: Metadata,
        ttl_seconds: u64,
        version: String,
    ) -> Self {
        let now = now_unix_seconds();
        Self {
            entry_id,
            prompt,
            response,
            user_id,
            scope_hash,
            tags,
            metadata,
            created_at: now,
            ttl_seconds,
            version,
            access_count: 0,
            last_access_at: now,
        }
    }

    pub fn age_seconds(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at)
    }

    pub fn mark_accessed(&mut self, now: u64) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_access_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_value_display_roundtrips_text() {
        let v: ScopeValue = "dev".into();
        assert_eq!(v.to_string(), "dev");
    }

    #[test]
    fn mark_accessed_bumps_count_and_timestamp() {
        let mut entry = CacheEntry::new(
            "e1".into(),
            "prompt".into(),
            "response".into(),
            None,
            None,
            vec![],
            Metadata::Null,
            3600,
            "v1".into(),
        );
        assert_eq!(entry.access_count, 0);
        entry.mark_accessed(entry.created_at + 10);
        assert_eq!(entry.access_count, 1);
        assert_eq!(entry.last_access_at, entry.created_at + 10);
    }

    #[test]
    fn age_seconds_is_saturating() {
        let entry = CacheEntry::new(
            "e1".into(),
            "p".into(),
            "r".into(),
            None,
            None,
            vec![],
            Metadata::Null,
            60,
            "v1".into(),
        );
        assert_eq!(entry.age_seconds(entry.created_at.saturating_sub(5)), 0);
    }
}
