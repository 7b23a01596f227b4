//! Retry policy and the executor that turns one logical request into one or
//! more proxy attempts (spec.md §4.5).

use crate::backoff::Backoff;
use crate::circuit_breaker::AdmitReason;
use crate::circuit_breaker_registry::CircuitBreakerRegistry;
use crate::clock::{Clock, MonotonicClock};
use crate::dispatcher::{DispatchErrorKind, DispatchRequest, Dispatcher, Method, Response};
use crate::error::{AttemptFailure, ConfigurationError, RotatorError, MAX_RETAINED_FAILURES};
use crate::jitter::JitterRatio;
use crate::metrics::{AttemptOutcomeKind, MetricsAggregator, RetryAttempt};
use crate::pool::Pool;
use crate::rate_limit::{RateLimitDecision, RateLimiter};
use crate::selection::{SelectionContext, Strategy};
use crate::sleeper::Sleeper;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Failure kinds that advance a proxy's stats/breaker failure window. Kinds
/// outside this set (DNS, upstream 4xx/5xx, cancellation) still surface as
/// non-retryable, but are not attributed to the proxy itself (spec.md §4.3).
const PROXY_ATTRIBUTABLE: [DispatchErrorKind; 5] = [
    DispatchErrorKind::Connect,
    DispatchErrorKind::Tls,
    DispatchErrorKind::ReadTimeout,
    DispatchErrorKind::WriteTimeout,
    DispatchErrorKind::Protocol,
];

fn is_proxy_attributable(kind: DispatchErrorKind) -> bool {
    PROXY_ATTRIBUTABLE.contains(&kind) || kind == DispatchErrorKind::Proxy5xx
}

fn default_retry_status_codes() -> HashSet<u16> {
    [502, 503, 504].into_iter().collect()
}

fn default_retry_error_kinds() -> HashSet<DispatchErrorKind> {
    [
        DispatchErrorKind::Connect,
        DispatchErrorKind::ReadTimeout,
        DispatchErrorKind::WriteTimeout,
        DispatchErrorKind::Dns,
        DispatchErrorKind::Protocol,
    ]
    .into_iter()
    .collect()
}

fn default_idempotent_methods() -> HashSet<Method> {
    [Method::Get, Method::Head, Method::Options].into_iter().collect()
}

/// Validated retry policy (spec.md §3). `backoff` and `jitter` are
/// themselves validated constructors, so a `RetryPolicy` can only hold
/// legal delay parameters.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub backoff: Backoff,
    pub jitter: JitterRatio,
    pub total_timeout: Option<Duration>,
    pub retry_status_codes: HashSet<u16>,
    pub retry_error_kinds: HashSet<DispatchErrorKind>,
    pub idempotent_methods: HashSet<Method>,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, backoff: Backoff, jitter: JitterRatio) -> Result<Self, ConfigurationError> {
        if !(1..=10).contains(&max_attempts) {
            return Err(ConfigurationError::new("max_attempts", "must be in [1, 10]"));
        }
        Ok(Self {
            max_attempts,
            backoff,
            jitter,
            total_timeout: None,
            retry_status_codes: default_retry_status_codes(),
            retry_error_kinds: default_retry_error_kinds(),
            idempotent_methods: default_idempotent_methods(),
        })
    }

    pub fn with_total_timeout(mut self, timeout: Duration) -> Self {
        self.total_timeout = Some(timeout);
        self
    }

    pub fn with_retry_status_codes(mut self, codes: HashSet<u16>) -> Self {
        self.retry_status_codes = codes;
        self
    }

    pub fn with_retry_error_kinds(mut self, kinds: HashSet<DispatchErrorKind>) -> Self {
        self.retry_error_kinds = kinds;
        self
    }

    pub fn with_idempotent_methods(mut self, methods: HashSet<Method>) -> Self {
        self.idempotent_methods = methods;
        self
    }

    fn nominal_backoff(&self, attempt: usize) -> Duration {
        self.backoff.nominal_delay(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            3,
            Backoff::exponential(Duration::from_secs(1), 2.0, Duration::from_secs(30)).unwrap(),
            JitterRatio::new(0.2).unwrap(),
        )
        .unwrap()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusClass {
    Success,
    Retryable,
    NonRetryable,
}

fn classify_status(policy: &RetryPolicy, status: u16) -> StatusClass {
    if policy.retry_status_codes.contains(&status) {
        StatusClass::Retryable
    } else if status < 400 {
        StatusClass::Success
    } else {
        StatusClass::NonRetryable
    }
}

/// Per-request options threaded into [`RetryExecutor::execute`].
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub attempt_timeout: Duration,
    pub rate_limit_identifier: String,
    pub rate_limit_endpoint: Option<String>,
    pub rate_limit_tier: Option<String>,
    pub target_region: Option<String>,
    pub target_country: Option<String>,
    pub session_key: Option<String>,
    pub geo_fallback_enabled: bool,
    pub idempotent_override: bool,
}

impl RequestOptions {
    pub fn new(method: Method, rate_limit_identifier: impl Into<String>, attempt_timeout: Duration) -> Self {
        Self {
            method,
            headers: HashMap::new(),
            body: None,
            attempt_timeout,
            rate_limit_identifier: rate_limit_identifier.into(),
            rate_limit_endpoint: None,
            rate_limit_tier: None,
            target_region: None,
            target_country: None,
            session_key: None,
            geo_fallback_enabled: false,
            idempotent_override: false,
        }
    }
}

/// Shared infra consumed by both the blocking and async forms of the
/// rotator façade (spec.md §4.8). One instance per [`crate::rotator::Rotator`].
pub struct RetryExecutor {
    pool: Arc<Pool>,
    breakers: Arc<CircuitBreakerRegistry>,
    rate_limiter: Arc<RateLimiter>,
    dispatcher: Arc<dyn Dispatcher>,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsAggregator>,
}

impl RetryExecutor {
    pub fn new(
        pool: Arc<Pool>,
        breakers: Arc<CircuitBreakerRegistry>,
        rate_limiter: Arc<RateLimiter>,
        dispatcher: Arc<dyn Dispatcher>,
        metrics: Arc<MetricsAggregator>,
    ) -> Self {
        Self {
            pool,
            breakers,
            rate_limiter,
            dispatcher,
            sleeper: Arc::new(crate::sleeper::TokioSleeper),
            clock: Arc::new(MonotonicClock::default()),
            metrics,
        }
    }

    pub fn with_sleeper_and_clock(mut self, sleeper: Arc<dyn Sleeper>, clock: Arc<dyn Clock>) -> Self {
        self.sleeper = sleeper;
        self.clock = clock;
        self
    }

    pub async fn execute(
        &self,
        strategy: &dyn Strategy,
        policy: &RetryPolicy,
        url: &str,
        mut options: RequestOptions,
        cancellation: &CancellationToken,
    ) -> Result<Response, RotatorError> {
        let mut effective_max_attempts = policy.max_attempts;
        if !policy.idempotent_methods.contains(&options.method) && !options.idempotent_override {
            effective_max_attempts = 1;
        }

        let started_at = self.clock.now_millis();
        let deadline_millis = policy.total_timeout.map(|d| started_at + d.as_millis() as u64);

        let mut context = SelectionContext::new();
        context.target_region = options.target_region.clone();
        context.target_country = options.target_country.clone();
        context.session_key = options.session_key.take();
        context.geo_fallback_enabled = options.geo_fallback_enabled;

        let mut failures = Vec::new();
        let mut attempt = 0usize;

        loop {
            if cancellation.is_cancelled() {
                return Err(RotatorError::Cancelled);
            }
            if let Some(deadline) = deadline_millis {
                if self.clock.now_millis() >= deadline {
                    return Err(RotatorError::DeadlineExceeded);
                }
            }

            let (_, snapshot) = self.pool.snapshot();
            if snapshot.is_empty() {
                return Err(RotatorError::NoProxyAvailable);
            }

            // `context.failed_proxies` is not applied here: each strategy
            // excludes it internally and falls back to the full slice when
            // every candidate has failed, so a single-proxy pool can still
            // be retried (spec.md §8, Property 3). Breaker admission is a
            // hard filter regardless of pool size.
            let admissible: Vec<_> = snapshot
                .into_iter()
                .filter(|p| {
                    let (reason, event) = self.breakers.admit_with_event(&p.id);
                    if let Some(event) = event {
                        self.metrics.record_breaker_event(event);
                    }
                    reason == AdmitReason::Admitted
                })
                .collect();

            let Some(proxy_id) = strategy.select(&admissible, &context) else {
                let all_excluded_by_breaker = admissible.is_empty()
                    && self.breakers.all_states().values().all(|s| *s != crate::circuit_breaker::CircuitState::Closed);
                return Err(if all_excluded_by_breaker {
                    RotatorError::AllCircuitsOpen
                } else {
                    RotatorError::NoProxyAvailable
                });
            };

            match self
                .rate_limiter
                .check(
                    &options.rate_limit_identifier,
                    options.rate_limit_endpoint.as_deref(),
                    options.rate_limit_tier.as_deref(),
                )
                .await
            {
                RateLimitDecision::Denied { retry_after } => {
                    return Err(RotatorError::RateLimited { retry_after });
                }
                RateLimitDecision::Allowed { .. } => {}
            }

            let proxy_endpoint = match self.pool.endpoint(&proxy_id) {
                Some(ep) => ep,
                None => {
                    context.failed_proxies.insert(proxy_id);
                    continue;
                }
            };

            let _ = self.pool.start_attempt(&proxy_id);
            let dispatch_started = self.clock.now_millis();
            let mut request = DispatchRequest::new(options.method, url, options.attempt_timeout);
            request.headers = options.headers.clone();
            request.body = options.body.clone();

            let dispatch_result = self.dispatcher.dispatch(request, &proxy_endpoint, cancellation).await;
            let latency = Duration::from_millis(self.clock.now_millis().saturating_sub(dispatch_started));

            let (outcome_class, dispatch_err, status) = match &dispatch_result {
                Ok(resp) => (classify_status(policy, resp.status), None, Some(resp.status)),
                Err(DispatchErrorKind::Cancelled) => {
                    return Err(RotatorError::Cancelled);
                }
                Err(kind) => {
                    let retryable = policy.retry_error_kinds.contains(kind) && kind.is_retryable();
                    (
                        if retryable { StatusClass::Retryable } else { StatusClass::NonRetryable },
                        Some(*kind),
                        None,
                    )
                }
            };

            let attributable = dispatch_err.map(is_proxy_attributable).unwrap_or(true);

            match outcome_class {
                StatusClass::Success => {
                    let _ = self.pool.record_outcome(&proxy_id, true, latency);
                    if let Some(event) = self.breakers.record_success(&proxy_id) {
                        self.metrics.record_breaker_event(event);
                    }
                    self.metrics.record(RetryAttempt {
                        timestamp_millis: dispatch_started,
                        proxy_id,
                        attempt_no: attempt,
                        outcome: AttemptOutcomeKind::Success,
                        latency_ms: latency.as_millis() as u64,
                        retried_after_delay_ms: None,
                    });
                    return dispatch_result.map_err(|k| RotatorError::Dispatch(k));
                }
                StatusClass::NonRetryable => {
                    if attributable {
                        let _ = self.pool.record_outcome(&proxy_id, false, latency);
                        if let Some(event) = self.breakers.record_failure(&proxy_id) {
                            self.metrics.record_breaker_event(event);
                        }
                    }
                    self.metrics.record(RetryAttempt {
                        timestamp_millis: dispatch_started,
                        proxy_id: proxy_id.clone(),
                        attempt_no: attempt,
                        outcome: AttemptOutcomeKind::NonRetryable,
                        latency_ms: latency.as_millis() as u64,
                        retried_after_delay_ms: None,
                    });
                    return match dispatch_result {
                        Ok(resp) => Ok(resp),
                        Err(kind) => Err(RotatorError::Dispatch(kind)),
                    };
                }
                StatusClass::Retryable => {
                    if attributable {
                        let _ = self.pool.record_outcome(&proxy_id, false, latency);
                        if let Some(event) = self.breakers.record_failure(&proxy_id) {
                            self.metrics.record_breaker_event(event);
                        }
                    }
                    self.metrics.record(RetryAttempt {
                        timestamp_millis: dispatch_started,
                        proxy_id: proxy_id.clone(),
                        attempt_no: attempt,
                        outcome: AttemptOutcomeKind::Retryable,
                        latency_ms: latency.as_millis() as u64,
                        retried_after_delay_ms: None,
                    });

                    if failures.len() < MAX_RETAINED_FAILURES {
                        failures.push(AttemptFailure {
                            proxy_id: proxy_id.clone(),
                            attempt_no: attempt,
                            kind: dispatch_err.unwrap_or(DispatchErrorKind::Protocol),
                        });
                    }

                    let nominal = policy.nominal_backoff(attempt);
                    let delay = policy.jitter.apply(nominal, policy.backoff.max_delay());

                    if attempt + 1 >= effective_max_attempts {
                        return Err(RotatorError::RetryExhausted { attempts: attempt + 1, failures });
                    }
                    if let Some(deadline) = deadline_millis {
                        if self.clock.now_millis() + delay.as_millis() as u64 > deadline {
                            return Err(RotatorError::RetryExhausted { attempts: attempt + 1, failures });
                        }
                    }

                    tokio::select! {
                        _ = self.sleeper.sleep(delay) => {}
                        _ = cancellation.cancelled() => return Err(RotatorError::Cancelled),
                    }

                    context.failed_proxies.insert(proxy_id);
                    attempt += 1;
                    let _ = status;
                }
            }
        }
    }
}
