//! Registry of per-proxy circuit breakers, keyed by proxy id (spec.md §4.3).

use crate::circuit_breaker::{AdmitReason, BreakerEvent, CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::clock::{Clock, MonotonicClock};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Holds one [`CircuitBreaker`] per proxy id. Breakers are created lazily on
/// first touch and live for as long as the proxy is known to the pool; the
/// rotator tears down a breaker when its proxy is removed.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock::default()))
    }

    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock, breakers: RwLock::new(HashMap::new()) }
    }

    fn get_or_create(&self, proxy_id: &str) -> Arc<CircuitBreaker> {
        if let Some(b) = self.breakers.read().unwrap_or_else(|p| p.into_inner()).get(proxy_id) {
            return Arc::clone(b);
        }
        let mut guard = self.breakers.write().unwrap_or_else(|p| p.into_inner());
        Arc::clone(guard.entry(proxy_id.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::with_clock(self.config, Arc::clone(&self.clock)))
        }))
    }

    pub fn admit(&self, proxy_id: &str) -> AdmitReason {
        self.get_or_create(proxy_id).admit().0
    }

    /// Like [`Self::admit`], but also returns the state-transition event (if
    /// admission forced OPEN -> HALF_OPEN) for forwarding to the metrics
    /// aggregator.
    pub fn admit_with_event(&self, proxy_id: &str) -> (AdmitReason, Option<BreakerEvent>) {
        self.get_or_create(proxy_id).admit()
    }

    pub fn record_success(&self, proxy_id: &str) -> Option<BreakerEvent> {
        self.get_or_create(proxy_id).record_success()
    }

    pub fn record_failure(&self, proxy_id: &str) -> Option<BreakerEvent> {
        self.get_or_create(proxy_id).record_failure()
    }

    pub fn reset(&self, proxy_id: &str) -> Option<BreakerEvent> {
        self.get_or_create(proxy_id).reset()
    }

    pub fn state(&self, proxy_id: &str) -> Option<CircuitState> {
        self.breakers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(proxy_id)
            .map(|b| b.state())
    }

    pub fn events(&self, proxy_id: &str) -> Vec<BreakerEvent> {
        self.breakers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(proxy_id)
            .map(|b| b.events())
            .unwrap_or_default()
    }

    /// Every breaker currently known, for an "all circuits open" check
    /// across the pool (spec.md §4.2 step 2b).
    pub fn all_states(&self) -> HashMap<String, CircuitState> {
        self.breakers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(id, b)| (id.clone(), b.state()))
            .collect()
    }

    pub fn remove(&self, proxy_id: &str) {
        self.breakers.write().unwrap_or_else(|p| p.into_inner()).remove(proxy_id);
    }

    pub fn len(&self) -> usize {
        self.breakers.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn registry() -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(
            CircuitBreakerConfig::new(2, Duration::from_secs(60), Duration::from_secs(30)).unwrap(),
        )
    }

    #[test]
    fn unknown_proxy_admits_by_default() {
        let r = registry();
        assert_eq!(r.admit("p1"), AdmitReason::Admitted);
        assert_eq!(r.state("p1"), Some(CircuitState::Closed));
    }

    #[test]
    fn breakers_are_independent_per_proxy() {
        let r = registry();
        r.record_failure("p1");
        r.record_failure("p1");
        assert_eq!(r.state("p1"), Some(CircuitState::Open));
        assert_eq!(r.state("p2"), None);
        assert_eq!(r.admit("p2"), AdmitReason::Admitted);
    }

    #[test]
    fn remove_drops_breaker_state() {
        let r = registry();
        r.record_failure("p1");
        r.remove("p1");
        assert_eq!(r.state("p1"), None);
        assert_eq!(r.len(), 0);
    }

    #[test]
    fn all_states_reports_every_touched_proxy() {
        let r = registry();
        r.admit("p1");
        r.admit("p2");
        let states = r.all_states();
        assert_eq!(states.len(), 2);
        assert_eq!(states["p1"], CircuitState::Closed);
    }

    #[test]
    fn reset_clears_open_state() {
        let r = registry();
        r.record_failure("p1");
        r.record_failure("p1");
        assert_eq!(r.state("p1"), Some(CircuitState::Open));
        r.reset("p1");
        assert_eq!(r.state("p1"), Some(CircuitState::Closed));
    }
}
