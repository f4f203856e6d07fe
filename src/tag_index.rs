//! Tag Index (§4.2): a reverse mapping `tag -> set<entry_id>`, stored in L2 (not as a
//! process-wide static — see DESIGN.md on why the teacher's `InvalidationRegistry` statics were
//! not carried forward).

use std::collections::HashSet;

use crate::backend::L2Backend;
use crate::error::{CacheError, Result};

/// Tag sets are namespaced under the cache's `name`, per §6: `<name>:tag:<tag_value>`.
fn tag_set_name(cache_name: &str, tag: &str) -> String {
    format!("{cache_name}:tag:{tag}")
}

pub struct TagIndex<'a> {
    backend: &'a dyn L2Backend,
    cache_name: String,
    max_tags_per_entry: usize,
}

impl<'a> TagIndex<'a> {
    pub fn new(backend: &'a dyn L2Backend, cache_name: impl Into<String>, max_tags_per_entry: usize) -> Self {
        Self {
            backend,
            cache_name: cache_name.into(),
            max_tags_per_entry,
        }
    }

    /// Validates a tag list against `max_tags_per_entry` (§4.2: "Entries exceed
    /// `max_tags_per_entry` -> fail with `InvalidArgument`").
    pub fn validate_tags(&self, tags: &[String]) -> Result<()> {
        if tags.len() > self.max_tags_per_entry {
            return Err(CacheError::InvalidArgument(format!(
                "entry has {} tags, exceeding max_tags_per_entry={}",
                tags.len(),
                self.max_tags_per_entry
            )));
        }
        Ok(())
    }

    /// Adds `entry_id` to `tag`'s set (§4.2 `attach`). Best-effort: failures here are logged by
    /// the caller and are non-fatal to the enclosing `store` (§4.6.2 step 4).
    pub async fn attach(&self, entry_id: &str, tag: &str) -> Result<()> {
        self.backend
            .set_member_add(&tag_set_name(&self.cache_name, tag), entry_id)
            .await
    }

    /// Resolves the live entry-id set for a tag (§4.2 `resolve`).
    pub async fn resolve(&self, tag: &str) -> Result<HashSet<String>> {
        self.backend.set_read(&tag_set_name(&self.cache_name, tag)).await
    }

    /// Removes `entry_id` from every tag's set it belongs to (§4.2 `remove_entry`).
    pub async fn remove_entry(&self, entry_id: &str, tags: &[String]) -> Result<()> {
        for tag in tags {
            self.backend
                .set_member_remove(&tag_set_name(&self.cache_name, tag), entry_id)
                .await?;
        }
        Ok(())
    }

    /// Resolves the union (OR) or intersection (AND) of the given tags' sets (§4.2
    /// `invalidate_by_tags`), without performing the deletion itself — that is the Cache
    /// Manager's responsibility (§4.6.4), since it must also touch L1 and the Metrics Registry.
    pub async fn resolve_tags(&self, tags: &[String], match_all: bool) -> Result<HashSet<String>> {
        if tags.is_empty() {
            return Ok(HashSet::new());
        }
        let mut sets = Vec::with_capacity(tags.len());
        for tag in tags {
            sets.push(self.resolve(tag).await?);
        }
        let mut result = sets[0].clone();
        for set in &sets[1..] {
            if match_all {
                result = result.intersection(set).cloned().collect();
            } else {
                result = result.union(set).cloned().collect();
            }
        }
        Ok(result)
    }

    /// Clears a tag's set entirely (§4.2, used after `invalidate_by_tag` deletes its members).
    pub async fn clear_tag(&self, tag: &str) -> Result<()> {
        self.backend.set_clear(&tag_set_name(&self.cache_name, tag)).await
    }
}
