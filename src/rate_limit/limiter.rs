//! Resolves tier/endpoint precedence and whitelist, then delegates the
//! atomic sliding-window check to a [`RateLimitStore`] (spec.md §4.4).

use super::store::{InMemoryRateLimitStore, RateLimitStore, WindowOutcome};
use super::{RateLimitConfig, RateLimitDecision};
use crate::adaptive::Adaptive;
use crate::clock::{Clock, MonotonicClock};
use std::sync::Arc;
use std::time::Duration;

pub struct RateLimiter {
    config: Adaptive<RateLimitConfig>,
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_store(config, Arc::new(InMemoryRateLimitStore::new()))
    }

    pub fn with_store(config: RateLimitConfig, store: Arc<dyn RateLimitStore>) -> Self {
        Self::with_store_and_clock(config, store, Arc::new(MonotonicClock::default()))
    }

    pub fn with_store_and_clock(
        config: RateLimitConfig,
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { config: Adaptive::new(config), store, clock }
    }

    pub fn set_config(&self, config: RateLimitConfig) {
        self.config.set(config);
    }

    pub fn config(&self) -> Arc<RateLimitConfig> {
        self.config.get()
    }

    /// Admission check for `identifier` against `endpoint`, using `tier`
    /// (falling back to the configured default tier when `None`).
    pub async fn check(
        &self,
        identifier: &str,
        endpoint: Option<&str>,
        tier: Option<&str>,
    ) -> RateLimitDecision {
        let config = self.config.get();
        if !config.enabled {
            return RateLimitDecision::Allowed { remaining: u32::MAX, reset_at_millis: 0 };
        }
        if config.whitelist.contains(identifier) {
            return RateLimitDecision::Allowed { remaining: u32::MAX, reset_at_millis: 0 };
        }

        let tier_name = tier.unwrap_or(&config.default_tier);
        let Some(tier) = config.tier(tier_name) else {
            // Unknown tier admits by default rather than blocking on a
            // misconfiguration discovered at request time.
            tracing::warn!(tier_name, "unknown rate limit tier, admitting");
            return RateLimitDecision::Allowed { remaining: u32::MAX, reset_at_millis: 0 };
        };

        let limit = tier.effective_limit(endpoint);
        let key = match endpoint {
            Some(e) => format!("{identifier}:{tier_name}:{e}"),
            None => format!("{identifier}:{tier_name}"),
        };

        let now = self.clock.now_millis();
        let outcome = self.store.check_and_record(&key, tier.window_size, limit, now).await;
        decision_from(outcome)
    }
}

fn decision_from(outcome: WindowOutcome) -> RateLimitDecision {
    if outcome.allowed {
        RateLimitDecision::Allowed {
            remaining: outcome.remaining,
            reset_at_millis: outcome.reset_at_millis,
        }
    } else {
        RateLimitDecision::Denied {
            retry_after: Duration::from_millis(outcome.retry_after_millis),
        }
    }
}

/// Wraps a primary (possibly distributed) store with a bounded timeout and
/// an in-memory fallback, so a slow/unreachable backend degrades to
/// best-effort local admission rather than blocking callers (spec.md §4.4
/// failure mode).
pub struct FallbackRateLimitStore<P> {
    primary: P,
    fallback: InMemoryRateLimitStore,
    timeout: Duration,
}

impl<P: RateLimitStore> FallbackRateLimitStore<P> {
    pub fn new(primary: P, timeout: Duration) -> Self {
        Self { primary, fallback: InMemoryRateLimitStore::new(), timeout }
    }
}

#[async_trait::async_trait]
impl<P: RateLimitStore> RateLimitStore for FallbackRateLimitStore<P> {
    async fn check_and_record(
        &self,
        key: &str,
        window: Duration,
        limit: u32,
        now_millis: u64,
    ) -> WindowOutcome {
        match tokio::time::timeout(
            self.timeout,
            self.primary.check_and_record(key, window, limit, now_millis),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(key, "rate limit backend timed out, falling back to in-memory");
                self.fallback.check_and_record(key, window, limit, now_millis).await
            }
        }
    }
}
