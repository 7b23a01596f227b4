use super::{admissible, SelectionContext, Strategy};
use crate::clock::{Clock, MonotonicClock};
use crate::proxy::ProxyView;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const REGIONAL_BONUS_MULTIPLIER: f64 = 1.1;
const EXPLORATION_SCORE: f64 = 0.5;
const MIN_WEIGHT_EPSILON: f64 = 0.01;

/// Next-in-insertion-order selection, excluding non-admissible candidates.
/// The position is stored as an index over the *admissible* list at call
/// time, so it stays `O(1)` and self-corrects as the pool changes shape.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for RoundRobin {
    fn select(&self, candidates: &[ProxyView], context: &SelectionContext) -> Option<String> {
        let pool = admissible(candidates, context);
        if pool.is_empty() {
            return None;
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % pool.len();
        Some(pool[i].id.clone())
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

/// Uniform random pick over the admissible set, via a seeded RNG for
/// reproducible tests.
pub struct Random {
    rng: Mutex<StdRng>,
}

impl Random {
    pub fn new() -> Self {
        Self::from_seed(rand::random())
    }

    pub fn from_seed(seed: u64) -> Self {
        Self { rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }
}

impl Default for Random {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for Random {
    fn select(&self, candidates: &[ProxyView], context: &SelectionContext) -> Option<String> {
        let pool = admissible(candidates, context);
        if pool.is_empty() {
            return None;
        }
        let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
        let i = rng.gen_range(0..pool.len());
        Some(pool[i].id.clone())
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

/// Weighted sample with `weight = success_rate^gamma`. Every candidate keeps
/// a small positive weight even at `success_rate == 0` so it is never
/// permanently starved of traffic (spec.md §4.2).
pub struct Weighted {
    gamma: f64,
    rng: Mutex<StdRng>,
}

impl Weighted {
    pub fn new(gamma: f64) -> Self {
        Self::from_seed(gamma, rand::random())
    }

    pub fn from_seed(gamma: f64, seed: u64) -> Self {
        Self { gamma, rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }
}

impl Default for Weighted {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Strategy for Weighted {
    fn select(&self, candidates: &[ProxyView], context: &SelectionContext) -> Option<String> {
        let pool = admissible(candidates, context);
        if pool.is_empty() {
            return None;
        }
        let weights: Vec<f64> = pool
            .iter()
            .map(|p| p.stats.success_rate().powf(self.gamma).max(MIN_WEIGHT_EPSILON))
            .collect();
        let total: f64 = weights.iter().sum();
        let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
        let mut pick = rng.gen_range(0.0..total);
        for (p, w) in pool.iter().zip(weights.iter()) {
            if pick < *w {
                return Some(p.id.clone());
            }
            pick -= w;
        }
        pool.last().map(|p| p.id.clone())
    }

    fn name(&self) -> &'static str {
        "weighted"
    }
}

/// Argmin `requests_started - requests_completed` (in-flight count), tied
/// by `requests_started`, tied by proxy id for determinism.
#[derive(Debug, Default)]
pub struct LeastUsed;

impl LeastUsed {
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for LeastUsed {
    fn select(&self, candidates: &[ProxyView], context: &SelectionContext) -> Option<String> {
        let pool = admissible(candidates, context);
        pool.into_iter()
            .min_by(|a, b| {
                let in_flight_a = a.stats.requests_started.saturating_sub(a.stats.requests_completed);
                let in_flight_b = b.stats.requests_started.saturating_sub(b.stats.requests_completed);
                in_flight_a
                    .cmp(&in_flight_b)
                    .then(a.stats.requests_started.cmp(&b.stats.requests_started))
                    .then(a.id.cmp(&b.id))
            })
            .map(|p| p.id.clone())
    }

    fn name(&self) -> &'static str {
        "least_used"
    }
}

/// Argmax `score = 0.7*success_rate + 0.3*(1 - norm_latency)`, with a
/// regional-preference bonus applied on retry attempts (spec.md §4.2).
pub struct PerformanceBased {
    reference_p95_ms: f64,
}

impl PerformanceBased {
    pub fn new(reference_p95_ms: f64) -> Self {
        Self { reference_p95_ms: reference_p95_ms.max(1.0) }
    }

    fn score(&self, p: &ProxyView, context: &SelectionContext) -> f64 {
        let base = if !p.stats.has_succeeded {
            EXPLORATION_SCORE
        } else {
            let ema = p.stats.ema_response_time_ms.unwrap_or(self.reference_p95_ms);
            let norm_latency = ema.min(self.reference_p95_ms) / self.reference_p95_ms;
            0.7 * p.stats.success_rate() + 0.3 * (1.0 - norm_latency)
        };
        let region_matches = context.apply_regional_bonus
            && context.target_region.is_some()
            && p.region == context.target_region;
        if region_matches {
            base * REGIONAL_BONUS_MULTIPLIER
        } else {
            base
        }
    }
}

impl Default for PerformanceBased {
    fn default() -> Self {
        Self::new(1000.0)
    }
}

impl Strategy for PerformanceBased {
    fn select(&self, candidates: &[ProxyView], context: &SelectionContext) -> Option<String> {
        let pool = admissible(candidates, context);
        pool.into_iter()
            .max_by(|a, b| {
                self.score(a, context)
                    .partial_cmp(&self.score(b, context))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    // tie-break: the more recently-successful proxy wins
                    // (spec.md §4.2). A proxy that has never succeeded sorts
                    // last.
                    .then_with(|| b.stats.last_success_at_millis.cmp(&a.stats.last_success_at_millis))
            })
            .map(|p| p.id.clone())
    }

    fn name(&self) -> &'static str {
        "performance_based"
    }
}

struct Binding {
    proxy_id: String,
    bound_at: u64,
}

/// Sticky selection for a session key, bound via a TTL map. An admissible
/// previous binding is reused; otherwise the fallback strategy picks and the
/// result is bound for future calls (spec.md §4.2).
pub struct SessionPersistence {
    fallback: Arc<dyn Strategy>,
    bindings: Mutex<HashMap<String, Binding>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl SessionPersistence {
    pub fn new(fallback: Arc<dyn Strategy>) -> Self {
        Self::with_ttl(fallback, Duration::from_secs(30 * 60))
    }

    pub fn with_ttl(fallback: Arc<dyn Strategy>, ttl: Duration) -> Self {
        Self::with_clock(fallback, ttl, Arc::new(MonotonicClock::default()))
    }

    pub fn with_clock(fallback: Arc<dyn Strategy>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { fallback, bindings: Mutex::new(HashMap::new()), ttl, clock }
    }

    fn prune_expired(&self, bindings: &mut HashMap<String, Binding>, now: u64) {
        let ttl_millis = self.ttl.as_millis() as u64;
        bindings.retain(|_, b| now.saturating_sub(b.bound_at) < ttl_millis);
    }
}

impl Strategy for SessionPersistence {
    fn select(&self, candidates: &[ProxyView], context: &SelectionContext) -> Option<String> {
        let Some(session_key) = &context.session_key else {
            return self.fallback.select(candidates, context);
        };

        let now = self.clock.now_millis();
        let mut bindings = self.bindings.lock().unwrap_or_else(|p| p.into_inner());
        self.prune_expired(&mut bindings, now);

        if let Some(binding) = bindings.get(session_key) {
            let still_admissible = candidates
                .iter()
                .any(|p| p.id == binding.proxy_id && !context.failed_proxies.contains(&p.id));
            if still_admissible {
                return Some(binding.proxy_id.clone());
            }
        }

        let picked = self.fallback.select(candidates, context)?;
        bindings.insert(session_key.clone(), Binding { proxy_id: picked.clone(), bound_at: now });
        Some(picked)
    }

    fn name(&self) -> &'static str {
        "session_persistence"
    }
}

/// Restricts the snapshot to `target_country`/`target_region` before
/// delegating to a fallback strategy; falls back to the full snapshot if the
/// restricted set is empty and `geo_fallback_enabled` (spec.md §4.2).
pub struct GeoTargeted {
    fallback: Arc<dyn Strategy>,
}

impl GeoTargeted {
    pub fn new(fallback: Arc<dyn Strategy>) -> Self {
        Self { fallback }
    }
}

impl Strategy for GeoTargeted {
    fn select(&self, candidates: &[ProxyView], context: &SelectionContext) -> Option<String> {
        let matches = |p: &&ProxyView| {
            context.target_country.as_deref().map_or(true, |c| p.country_code.as_deref() == Some(c))
                && context.target_region.as_deref().map_or(true, |r| p.region.as_deref() == Some(r))
        };

        let restricted: Vec<ProxyView> =
            candidates.iter().filter(matches).cloned().collect();

        if !restricted.is_empty() {
            self.fallback.select(&restricted, context)
        } else if context.geo_fallback_enabled {
            self.fallback.select(candidates, context)
        } else {
            None
        }
    }

    fn name(&self) -> &'static str {
        "geo_targeted"
    }
}
