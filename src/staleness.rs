//! Staleness Controller (§4.5): the state machine applied to each retrieved L2 candidate, plus
//! the at-most-one-in-flight-per-key background refresh dispatcher (§5, §9).

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::backend::Payload;
use crate::hash::L1Key;

/// Outcome of applying the staleness state machine to one candidate (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalenessOutcome {
    /// `age <= ttl`.
    Fresh,
    /// `ttl < age <= ttl + tol`; serve, and schedule a refresh if enabled and a callback exists.
    StaleAcceptable,
    /// Any discard reason: version mismatch, past `max_stale`, or past `ttl + tol` without
    /// stale-while-revalidate configured.
    Discard(DiscardReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    VersionMismatch,
    StaleRefused,
}

/// Configuration the Staleness Controller needs, independent of the rest of [`crate::config::CacheConfig`]
/// so it can be unit tested in isolation.
#[derive(Debug, Clone, Copy)]
pub struct StalenessConfig {
    pub tol: u64,
    pub max_stale: u64,
    pub enable_stale_while_revalidate: bool,
    pub enable_version_checking: bool,
}

/// Applies the §4.5 state table to one candidate, given whether a refresh callback is
/// registered (needed to resolve the "expired-but-below-hard-limit" row, §4.5 row 3). `now` and
/// `age` are both in seconds.
pub fn evaluate_with_callback(
    payload: &Payload,
    now: u64,
    expected_version: &str,
    config: &StalenessConfig,
    has_callback: bool,
) -> StalenessOutcome {
    if config.enable_version_checking && payload.version != expected_version {
        return StalenessOutcome::Discard(DiscardReason::VersionMismatch);
    }
    let age = now.saturating_sub(payload.created_at);
    let ttl = payload.ttl_seconds;
    let soft_limit = ttl.saturating_add(config.tol);

    if age <= ttl {
        return StalenessOutcome::Fresh;
    }
    if age <= soft_limit {
        return StalenessOutcome::StaleAcceptable;
    }
    if age <= config.max_stale && config.enable_stale_while_revalidate && has_callback {
        return StalenessOutcome::StaleAcceptable;
    }
    StalenessOutcome::Discard(DiscardReason::StaleRefused)
}

/// Whether a surviving [`StalenessOutcome::StaleAcceptable`] should schedule a background
/// refresh: only when stale-while-revalidate is enabled and a callback is present. Per
/// SPEC_FULL.md §9 Open Question (b): if enabled with no callback, stale is still served but no
/// refresh is scheduled.
pub fn should_schedule_refresh(config: &StalenessConfig, has_callback: bool) -> bool {
    config.enable_stale_while_revalidate && has_callback
}

/// Tracks in-flight background refreshes so exactly one is scheduled per `l1_key` at a time
/// (§4.5, §5, §9 "Background refresh").
#[derive(Clone, Default)]
pub struct RefreshDispatcher {
    in_flight: Arc<Mutex<HashSet<L1Key>>>,
}

impl RefreshDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to claim the refresh slot for `key`. Returns `true` if this caller now owns the
    /// refresh (and must call [`RefreshDispatcher::complete`] when done); `false` if another
    /// refresh is already in flight for this key, in which case the caller must not re-enqueue
    /// (§4.5: "additional requests ... do not re-enqueue").
    pub fn try_claim(&self, key: L1Key) -> bool {
        self.in_flight.lock().insert(key)
    }

    /// Releases the refresh slot for `key`, whether the refresh succeeded or failed (§4.5, §7:
    /// "the in-flight flag [is] cleared").
    pub fn complete(&self, key: L1Key) {
        self.in_flight.lock().remove(&key);
    }

    pub fn is_in_flight(&self, key: &L1Key) -> bool {
        self.in_flight.lock().contains(key)
    }
}

/// Logs the outcome of a staleness evaluation at the appropriate level (§4.10).
pub fn log_outcome(key: L1Key, outcome: StalenessOutcome) {
    match outcome {
        StalenessOutcome::Fresh => debug!(%key, "l2 candidate is fresh"),
        StalenessOutcome::StaleAcceptable => info!(%key, "serving stale-acceptable l2 candidate"),
        StalenessOutcome::Discard(DiscardReason::VersionMismatch) => {
            debug!(%key, "discarding l2 candidate: version mismatch")
        }
        StalenessOutcome::Discard(DiscardReason::StaleRefused) => {
            warn!(%key, "discarding l2 candidate: past staleness tolerance")
        }
    }
}
