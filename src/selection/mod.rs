//! Proxy selection strategies (spec.md §4.2).
//!
//! Strategies are pure functions over a candidate slice the retry executor
//! has already filtered down to circuit-admitted proxies. Exclusion of
//! `context.failed_proxies` happens inside each strategy via [`admissible`],
//! which falls back to the full slice when every candidate has already
//! failed — the only way a pool of size one can still be retried up to
//! `max_attempts` times (spec.md §8, Testable Property 3).

pub mod composite;
pub mod strategies;

pub use composite::CompositeStrategy;
pub use strategies::{
    GeoTargeted, LeastUsed, PerformanceBased, Random, RoundRobin, SessionPersistence, Weighted,
};

use crate::proxy::ProxyView;
use std::collections::HashSet;

/// Per-request context threaded through selection. Reused, with
/// `failed_proxies` enlarged, on each retry attempt (spec.md §4.5).
#[derive(Debug, Clone, Default)]
pub struct SelectionContext {
    pub failed_proxies: HashSet<String>,
    pub target_country: Option<String>,
    pub target_region: Option<String>,
    pub session_key: Option<String>,
    pub geo_fallback_enabled: bool,
    /// Set by the retry executor on failover attempts so `performance_based`
    /// applies the +10% regional-preference bonus (spec.md §4.2).
    pub apply_regional_bonus: bool,
}

impl SelectionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target_region(mut self, region: impl Into<String>) -> Self {
        self.target_region = Some(region.into());
        self
    }

    pub fn with_target_country(mut self, country: impl Into<String>) -> Self {
        self.target_country = Some(country.into());
        self
    }

    pub fn with_session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key = Some(key.into());
        self
    }

    /// Returns the context used for the next failover attempt: the failed
    /// proxy is excluded and the regional bonus is activated.
    pub fn for_retry(&self, failed_proxy_id: &str) -> Self {
        let mut next = self.clone();
        next.failed_proxies.insert(failed_proxy_id.to_string());
        next.apply_regional_bonus = true;
        next
    }
}

/// A proxy selection rule. `select` must exclude nothing beyond what the
/// caller already filtered out of `candidates`, and must never block
/// (spec.md §4.2 failure semantics: an empty admissible set yields `None`).
pub trait Strategy: Send + Sync {
    fn select(&self, candidates: &[ProxyView], context: &SelectionContext) -> Option<String>;
    fn name(&self) -> &'static str;
}

/// Helper shared by every strategy: drop candidates already excluded by the
/// caller's `failed_proxies` set. Strategies call this first so the rest of
/// their logic only sees truly-admissible candidates.
///
/// If every candidate has already failed, the exclusion is dropped instead
/// of yielding an empty pool: a deployment with no fresh proxy left to try
/// must still be able to retry the one(s) it has (spec.md §8, Property 3).
fn admissible<'a>(candidates: &'a [ProxyView], context: &SelectionContext) -> Vec<&'a ProxyView> {
    let filtered: Vec<&ProxyView> =
        candidates.iter().filter(|p| !context.failed_proxies.contains(&p.id)).collect();
    if filtered.is_empty() && !candidates.is_empty() {
        candidates.iter().collect()
    } else {
        filtered
    }
}
