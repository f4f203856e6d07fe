//! Metrics Registry (§4.7, §6): atomic counters and latency accumulators, plus Prometheus text
//! exposition. Grounded in the teacher's `CacheStats` (atomics + relaxed-ordering snapshot) and
//! generalized with `litellm-rs`'s per-layer `AtomicCacheStats` shape and per-bucket/per-tag
//! counters backed by `DashMap`, the same crate the teacher uses for its lock-free variant.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// A hit/miss counter pair plus a cumulative-latency accumulator, used identically for L1 and
/// L2 (§4.7: "Per layer L1/L2: hits, misses, cumulative latency and count for averages").
#[derive(Default)]
struct LayerCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    latency_micros_total: AtomicU64,
    latency_samples: AtomicU64,
}

impl LayerCounters {
    fn record_hit(&self, latency_micros: u64) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.latency_micros_total.fetch_add(latency_micros, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self, latency_micros: u64) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.latency_micros_total.fetch_add(latency_micros, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
    fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Average latency in milliseconds since start (SPEC_FULL.md §9 open question (a):
    /// average-since-start, not windowed).
    fn avg_latency_ms(&self) -> f64 {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        if samples == 0 {
            return 0.0;
        }
        let total_micros = self.latency_micros_total.load(Ordering::Relaxed);
        (total_micros as f64 / samples as f64) / 1000.0
    }

    fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }
}

/// Top-level counters maintained by the Cache Manager (§4.7).
#[derive(Default)]
pub struct MetricsRegistry {
    total_queries: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    l1: LayerCounters,
    l2: LayerCounters,
    context_hits: DashMap<String, AtomicU64>,
    tag_invalidations: DashMap<String, AtomicU64>,
    stale_served: AtomicU64,
    stale_refused: AtomicU64,
    version_mismatches: AtomicU64,
}

/// Point-in-time snapshot of every counter, suitable for `get_metrics()` (§4.6.5).
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub total_queries: u64,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub llm_calls_avoided: u64,
    pub l1_hits: u64,
    pub l1_misses: u64,
    pub l2_hits: u64,
    pub l2_misses: u64,
    pub l1_latency_ms: f64,
    pub l2_latency_ms: f64,
    pub hit_rate: f64,
    pub l1_hit_rate: f64,
    pub l2_hit_rate: f64,
    pub context_hits: Vec<(String, u64)>,
    pub tag_invalidations: Vec<(String, u64)>,
    pub stale_served: u64,
    pub stale_refused: u64,
    pub version_mismatches: u64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_query(&self) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l1_hit(&self, latency_micros: u64) {
        self.l1.record_hit(latency_micros);
    }

    pub fn record_l1_miss(&self, latency_micros: u64) {
        self.l1.record_miss(latency_micros);
    }

    pub fn record_l2_hit(&self, latency_micros: u64) {
        self.l2.record_hit(latency_micros);
    }

    pub fn record_l2_miss(&self, latency_micros: u64) {
        self.l2.record_miss(latency_micros);
    }

    /// Bumps the per-scope-bucket hit counter (§4.7: keyed by `context_hit_key_field`, or
    /// `"_none_"` if the field is absent from the request's scope).
    pub fn record_context_hit(&self, bucket: &str) {
        self.context_hits
            .entry(bucket.to_string())
            .or_insert_with(AtomicU64::default)
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tag_invalidation(&self, tag: &str, count: u64) {
        self.tag_invalidations
            .entry(tag.to_string())
            .or_insert_with(AtomicU64::default)
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_stale_served(&self) {
        self.stale_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_refused(&self) {
        self.stale_refused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_version_mismatch(&self) {
        self.version_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        MetricsSnapshot {
            total_queries: self.total_queries.load(Ordering::Relaxed),
            hits,
            misses,
            errors: self.errors.load(Ordering::Relaxed),
            llm_calls_avoided: hits,
            l1_hits: self.l1.hits(),
            l1_misses: self.l1.misses(),
            l2_hits: self.l2.hits(),
            l2_misses: self.l2.misses(),
            l1_latency_ms: self.l1.avg_latency_ms(),
            l2_latency_ms: self.l2.avg_latency_ms(),
            hit_rate: if total == 0 {
                0.0
            } else {
                (hits as f64 / total as f64) * 100.0
            },
            l1_hit_rate: self.l1.hit_rate(),
            l2_hit_rate: self.l2.hit_rate(),
            context_hits: self
                .context_hits
                .iter()
                .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
                .collect(),
            tag_invalidations: self
                .tag_invalidations
                .iter()
                .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
                .collect(),
            stale_served: self.stale_served.load(Ordering::Relaxed),
            stale_refused: self.stale_refused.load(Ordering::Relaxed),
            version_mismatches: self.version_mismatches.load(Ordering::Relaxed),
        }
    }

    /// Prometheus text exposition (§6), using the `semantic_cache_` prefix regardless of
    /// `observability.metrics_prefix` customization — the fixed names in §6 are the contract;
    /// `metrics_prefix` (when not the default) is reserved for future multi-instance
    /// disambiguation and is not yet wired into the exposition format.
    pub fn prometheus_text(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();
        out.push_str(&gauge_line("semantic_cache_queries_total", snapshot.total_queries as f64));
        out.push_str(&gauge_line("semantic_cache_hits_total", snapshot.hits as f64));
        out.push_str(&gauge_line("semantic_cache_misses_total", snapshot.misses as f64));
        out.push_str(&gauge_line("semantic_cache_errors_total", snapshot.errors as f64));
        out.push_str(&gauge_line(
            "semantic_cache_llm_calls_avoided",
            snapshot.llm_calls_avoided as f64,
        ));
        out.push_str(&gauge_line("semantic_cache_l1_hits_total", snapshot.l1_hits as f64));
        out.push_str(&gauge_line("semantic_cache_l1_misses_total", snapshot.l1_misses as f64));
        out.push_str(&gauge_line("semantic_cache_l2_hits_total", snapshot.l2_hits as f64));
        out.push_str(&gauge_line("semantic_cache_l2_misses_total", snapshot.l2_misses as f64));
        out.push_str(&gauge_line("semantic_cache_l1_latency_ms", snapshot.l1_latency_ms));
        out.push_str(&gauge_line("semantic_cache_l2_latency_ms", snapshot.l2_latency_ms));
        out.push_str(&gauge_line("semantic_cache_hit_rate", snapshot.hit_rate));
        out.push_str(&gauge_line("semantic_cache_l1_hit_rate", snapshot.l1_hit_rate));
        out.push_str(&gauge_line("semantic_cache_l2_hit_rate", snapshot.l2_hit_rate));
        for (bucket, count) in &snapshot.context_hits {
            out.push_str(&format!(
                "semantic_cache_context_hits_total{{context_type=\"{bucket}\"}} {count}\n"
            ));
        }
        for (tag, count) in &snapshot.tag_invalidations {
            out.push_str(&format!(
                "semantic_cache_tag_invalidations_total{{tag=\"{tag}\"}} {count}\n"
            ));
        }
        out.push_str(&gauge_line("semantic_cache_stale_served_total", snapshot.stale_served as f64));
        out.push_str(&gauge_line(
            "semantic_cache_stale_refused_total",
            snapshot.stale_refused as f64,
        ));
        out.push_str(&gauge_line(
            "semantic_cache_version_mismatches_total",
            snapshot.version_mismatches as f64,
        ));
        out
    }
}

fn gauge_line(name: &str, value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{name} {}\n", value as i64)
    } else {
        format!("{name} {value}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_is_zero_with_no_activity() {
        let metrics = MetricsRegistry::new();
        assert_eq!(metrics.snapshot().hit_rate, 0.0);
    }

    #[test]
    fn hit_rate_reflects_recorded_hits_and_misses() {
        let metrics = MetricsRegistry::new();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.hits, 2);
        assert_eq!(snapshot.misses, 1);
        assert!((snapshot.hit_rate - 66.66666).abs() < 0.01);
    }

    #[test]
    fn llm_calls_avoided_equals_hits() {
        let metrics = MetricsRegistry::new();
        metrics.record_hit();
        metrics.record_hit();
        assert_eq!(metrics.snapshot().llm_calls_avoided, 2);
    }

    #[test]
    fn l1_latency_averages_across_samples() {
        let metrics = MetricsRegistry::new();
        metrics.record_l1_hit(1000);
        metrics.record_l1_hit(3000);
        assert!((metrics.snapshot().l1_latency_ms - 2.0).abs() < 1e-9);
    }

    #[test]
    fn context_hits_bucketed_by_key() {
        let metrics = MetricsRegistry::new();
        metrics.record_context_hit("dev");
        metrics.record_context_hit("dev");
        metrics.record_context_hit("gamer");
        let snapshot = metrics.snapshot();
        let dev = snapshot.context_hits.iter().find(|(k, _)| k == "dev").unwrap();
        assert_eq!(dev.1, 2);
    }

    #[test]
    fn prometheus_text_contains_expected_metric_names() {
        let metrics = MetricsRegistry::new();
        metrics.record_hit();
        metrics.record_tag_invalidation("brand:apple", 2);
        let text = metrics.prometheus_text();
        assert!(text.contains("semantic_cache_queries_total"));
        assert!(text.contains("semantic_cache_hits_total 1"));
        assert!(text.contains("semantic_cache_tag_invalidations_total{tag=\"brand:apple\"} 2"));
    }

    #[test]
    fn metrics_identity_total_queries_equals_hits_plus_misses_plus_errors() {
        let metrics = MetricsRegistry::new();
        metrics.record_query();
        metrics.record_query();
        metrics.record_hit();
        metrics.record_miss();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_queries, snapshot.hits + snapshot.misses + snapshot.errors);
    }
}
