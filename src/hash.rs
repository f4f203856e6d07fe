//! Key & Scope Hasher (§4.4).
//!
//! Derives the L1 lookup key and the L2-filterable `scope_hash` from a prompt, optional user id,
//! and the caller's scope, restricted to the configured `context_fields` allowlist.

use twox_hash::xxh3::hash128;
use unicode_normalization::UnicodeNormalization;

use crate::entry::{Scope, ScopeValue};

/// Bucket key shared by every entry whose scope subset (after applying the `context_fields`
/// allowlist) is empty (§4.4, boundary behavior in SPEC_FULL.md §8).
pub const EMPTY_SCOPE_BUCKET: &str = "_empty_scope_";

/// An opaque, 128-bit L1 lookup key. Collisions are possible and safe: they produce an L1 miss,
/// and L2 remains authoritative (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct L1Key(pub u128);

impl std::fmt::Display for L1Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Unicode NFC, trimmed, internal whitespace collapsed to single spaces. Lowercasing is
/// deliberately not applied — embeddings preserve case (§4.4).
pub fn normalize_prompt(prompt: &str) -> String {
    let nfc: String = prompt.nfc().collect();
    let mut out = String::with_capacity(nfc.len());
    let mut last_was_space = true; // swallow leading whitespace
    for ch in nfc.trim().chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Restricts `scope` to the allowlisted `context_fields`, dropping everything else (§3).
pub fn scope_subset(scope: &Scope, context_fields: &[String]) -> Scope {
    scope
        .iter()
        .filter(|(k, _)| context_fields.iter().any(|f| f == *k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Canonical serialization of a (already-subsetted) scope: sorted keys (guaranteed by `Scope`
/// being a `BTreeMap`), `key=value` pairs joined with `&`, matching the "sorted keys, stable
/// value encoding" requirement of §3.
pub fn canonicalize_scope(subset: &Scope) -> String {
    if subset.is_empty() {
        return EMPTY_SCOPE_BUCKET.to_string();
    }
    subset
        .iter()
        .map(|(k, v)| format!("{k}={}", canonical_value(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn canonical_value(value: &ScopeValue) -> String {
    match value {
        ScopeValue::Text(s) => s.clone(),
        ScopeValue::Int(i) => i.to_string(),
        ScopeValue::Bool(b) => b.to_string(),
    }
}

/// `scope_hash`: a 16-character hex digest of the canonical scope subset, usable as an L2
/// filter field (§4.4).
pub fn scope_hash(subset: &Scope) -> String {
    let canonical = canonicalize_scope(subset);
    let digest = hash128(canonical.as_bytes());
    // 16 hex chars = 64 bits; truncating the 128-bit hash is acceptable here since scope_hash
    // is a filter convenience, not the collision-safety boundary (l1_key is, at full width).
    format!("{:016x}", (digest as u64))
}

/// Builds the L1 lookup key from normalized prompt, user id, and canonical scope subset (§4.4).
pub fn l1_key(prompt: &str, user_id: Option<&str>, scope: &Scope, context_fields: &[String]) -> L1Key {
    let normalized = normalize_prompt(prompt);
    let subset = scope_subset(scope, context_fields);
    let canonical = canonicalize_scope(&subset);
    let mut material = String::with_capacity(normalized.len() + canonical.len() + 16);
    material.push_str(&normalized);
    material.push('\u{0}');
    if let Some(uid) = user_id {
        material.push_str(uid);
    }
    material.push('\u{0}');
    material.push_str(&canonical);
    L1Key(hash128(material.as_bytes()))
}
