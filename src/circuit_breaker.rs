//! Per-proxy circuit breaker: a three-state machine over a rolling window of
//! failure timestamps (spec.md §3, §4.3, §8 property 1).

use crate::clock::{Clock, MonotonicClock};
use crate::error::ConfigurationError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Wire-format name, serialized as the three uppercase names (spec.md §6).
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitReason {
    Admitted,
    CircuitOpen,
    HalfOpenLimitReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerEvent {
    pub from: CircuitState,
    pub to: CircuitState,
    pub at_millis: u64,
}

const MAX_EVENTS: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: usize,
    pub window_duration: Duration,
    pub timeout_duration: Duration,
    pub half_open_probe_limit: usize,
}

impl CircuitBreakerConfig {
    pub fn new(
        failure_threshold: usize,
        window_duration: Duration,
        timeout_duration: Duration,
    ) -> Result<Self, ConfigurationError> {
        Self::with_probe_limit(failure_threshold, window_duration, timeout_duration, 1)
    }

    pub fn with_probe_limit(
        failure_threshold: usize,
        window_duration: Duration,
        timeout_duration: Duration,
        half_open_probe_limit: usize,
    ) -> Result<Self, ConfigurationError> {
        if failure_threshold == 0 {
            return Err(ConfigurationError::new("failure_threshold", "must be > 0"));
        }
        if window_duration.is_zero() {
            return Err(ConfigurationError::new("window_duration", "must be > 0"));
        }
        if timeout_duration.is_zero() {
            return Err(ConfigurationError::new("timeout_duration", "must be > 0"));
        }
        if half_open_probe_limit == 0 {
            return Err(ConfigurationError::new("half_open_probe_limit", "must be > 0"));
        }
        Ok(Self { failure_threshold, window_duration, timeout_duration, half_open_probe_limit })
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_duration: Duration::from_secs(60),
            timeout_duration: Duration::from_secs(30),
            half_open_probe_limit: 1,
        }
    }
}

struct Inner {
    state: CircuitState,
    failure_timestamps: VecDeque<u64>,
    opened_at: Option<u64>,
    half_open_in_flight: usize,
    events: VecDeque<BreakerEvent>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_timestamps: VecDeque::new(),
            opened_at: None,
            half_open_in_flight: 0,
            events: VecDeque::new(),
        }
    }

    fn transition(&mut self, to: CircuitState, at_millis: u64) -> Option<BreakerEvent> {
        if self.state == to {
            return None;
        }
        let event = BreakerEvent { from: self.state, to, at_millis };
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(event);
        self.state = to;
        if to == CircuitState::Open {
            self.opened_at = Some(at_millis);
        }
        Some(event)
    }

    fn prune_window(&mut self, now: u64, window_millis: u64) {
        while let Some(&oldest) = self.failure_timestamps.front() {
            if now.saturating_sub(oldest) > window_millis {
                self.failure_timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

/// One breaker per proxy id. Holds its own lock so registry operations stay
/// O(1) and independent across proxies (spec.md §4.3).
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker").field("config", &self.config).finish()
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock::default()))
    }

    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock, inner: Mutex::new(Inner::new()) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Admission check. May transition OPEN -> HALF_OPEN as a side effect
    /// when the recovery timeout has elapsed (spec.md §4.3).
    pub fn admit(&self) -> (AdmitReason, Option<BreakerEvent>) {
        let now = self.clock.now_millis();
        let mut s = self.lock();
        match s.state {
            CircuitState::Closed => (AdmitReason::Admitted, None),
            CircuitState::Open => {
                let opened_at = s.opened_at.unwrap_or(now);
                if now.saturating_sub(opened_at) >= self.config.timeout_duration.as_millis() as u64
                {
                    let event = s.transition(CircuitState::HalfOpen, now);
                    s.half_open_in_flight = 1;
                    (AdmitReason::Admitted, event)
                } else {
                    (AdmitReason::CircuitOpen, None)
                }
            }
            CircuitState::HalfOpen => {
                if s.half_open_in_flight < self.config.half_open_probe_limit {
                    s.half_open_in_flight += 1;
                    (AdmitReason::Admitted, None)
                } else {
                    (AdmitReason::HalfOpenLimitReached, None)
                }
            }
        }
    }

    pub fn record_success(&self) -> Option<BreakerEvent> {
        let now = self.clock.now_millis();
        let mut s = self.lock();
        match s.state {
            CircuitState::HalfOpen => {
                s.half_open_in_flight = s.half_open_in_flight.saturating_sub(1);
                s.failure_timestamps.clear();
                s.opened_at = None;
                let event = s.transition(CircuitState::Closed, now);
                tracing::info!("circuit breaker -> closed");
                event
            }
            CircuitState::Closed => {
                s.failure_timestamps.clear();
                None
            }
            CircuitState::Open => None,
        }
    }

    pub fn record_failure(&self) -> Option<BreakerEvent> {
        let now = self.clock.now_millis();
        let window_millis = self.config.window_duration.as_millis() as u64;
        let mut s = self.lock();
        match s.state {
            CircuitState::HalfOpen => {
                s.half_open_in_flight = s.half_open_in_flight.saturating_sub(1);
                let event = s.transition(CircuitState::Open, now);
                tracing::warn!("circuit breaker: half-open probe failed -> open");
                event
            }
            CircuitState::Closed => {
                s.failure_timestamps.push_back(now);
                s.prune_window(now, window_millis);
                let count = s.failure_timestamps.len();
                if count >= self.config.failure_threshold {
                    let event = s.transition(CircuitState::Open, now);
                    tracing::error!(count, threshold = self.config.failure_threshold, "circuit breaker -> open");
                    event
                } else {
                    None
                }
            }
            CircuitState::Open => None,
        }
    }

    pub fn reset(&self) -> Option<BreakerEvent> {
        let now = self.clock.now_millis();
        let mut s = self.lock();
        s.failure_timestamps.clear();
        s.opened_at = None;
        s.half_open_in_flight = 0;
        s.transition(CircuitState::Closed, now)
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count_in_window(&self) -> usize {
        let now = self.clock.now_millis();
        let window_millis = self.config.window_duration.as_millis() as u64;
        let mut s = self.lock();
        s.prune_window(now, window_millis);
        s.failure_timestamps.len()
    }

    pub fn events(&self) -> Vec<BreakerEvent> {
        self.lock().events.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::ManualClock;

    fn breaker(k: usize, w: Duration, t: Duration) -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::new();
        let config = CircuitBreakerConfig::new(k, w, t).unwrap();
        (CircuitBreaker::with_clock(config, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn starts_closed_and_admits() {
        let (b, _) = breaker(3, Duration::from_secs(60), Duration::from_secs(30));
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.admit().0, AdmitReason::Admitted);
    }

    #[test]
    fn scenario_s3_opens_after_threshold_then_half_opens_after_timeout() {
        let (b, clock) = breaker(5, Duration::from_secs(60), Duration::from_secs(30));
        for t in 0..5u64 {
            clock.set(t * 1000);
            b.admit();
            b.record_failure();
        }
        assert_eq!(b.state(), CircuitState::Open);

        clock.set(20_000);
        assert_eq!(b.admit().0, AdmitReason::CircuitOpen);

        clock.set(35_000);
        assert_eq!(b.admit().0, AdmitReason::Admitted);
        assert_eq!(b.state(), CircuitState::HalfOpen);

        b.record_success();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.failure_count_in_window(), 0);
    }

    #[test]
    fn half_open_probe_failure_reopens() {
        let (b, clock) = breaker(1, Duration::from_secs(60), Duration::from_millis(100));
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
        clock.advance(150);
        assert_eq!(b.admit().0, AdmitReason::Admitted);
        assert_eq!(b.state(), CircuitState::HalfOpen);
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_limits_concurrent_probes() {
        let (b, clock) = breaker(1, Duration::from_secs(60), Duration::from_millis(100));
        b.record_failure();
        clock.advance(150);
        assert_eq!(b.admit().0, AdmitReason::Admitted); // first probe, transitions to half-open
        assert_eq!(b.admit().0, AdmitReason::HalfOpenLimitReached);
    }

    #[test]
    fn failures_outside_window_are_pruned() {
        let (b, clock) = breaker(3, Duration::from_secs(10), Duration::from_secs(30));
        clock.set(0);
        b.record_failure();
        clock.set(1000);
        b.record_failure();
        clock.set(20_000); // window has elapsed for the first two failures
        b.record_failure();
        assert_eq!(b.failure_count_in_window(), 1);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn reset_forces_closed_and_clears_window() {
        let (b, _) = breaker(1, Duration::from_secs(60), Duration::from_secs(30));
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
        b.reset();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.failure_count_in_window(), 0);
    }

    #[test]
    fn success_in_closed_state_clears_failure_window() {
        let (b, _) = breaker(3, Duration::from_secs(60), Duration::from_secs(30));
        b.record_failure();
        b.record_failure();
        b.record_success();
        assert_eq!(b.failure_count_in_window(), 0);
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Closed, "count was reset by the success");
    }

    #[test]
    fn rejects_zero_failure_threshold() {
        assert!(CircuitBreakerConfig::new(0, Duration::from_secs(1), Duration::from_secs(1))
            .is_err());
    }

    #[test]
    fn wire_state_names_are_uppercase() {
        assert_eq!(CircuitState::Closed.as_wire_str(), "CLOSED");
        assert_eq!(CircuitState::Open.as_wire_str(), "OPEN");
        assert_eq!(CircuitState::HalfOpen.as_wire_str(), "HALF_OPEN");
    }
}
