//! The façade: `request`, pool CRUD, strategy/policy hot-swap, circuit
//! reset, and metrics — in both blocking and async forms sharing one
//! executor (spec.md §4.8).

use crate::adaptive::Adaptive;
use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};
use crate::circuit_breaker_registry::CircuitBreakerRegistry;
use crate::dispatcher::{Dispatcher, Response};
use crate::error::{PoolError, RotatorError};
use crate::metrics::{MetricsAggregator, MetricsSummary};
use crate::pool::Pool;
use crate::proxy::{Proxy, ProxyView};
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::retry::{RequestOptions, RetryExecutor, RetryPolicy};
use crate::selection::strategies::RoundRobin;
use crate::selection::Strategy;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;

/// Owns the pool, breaker registry, rate limiter, metrics aggregator,
/// current strategy, current retry policy, and the shared dispatcher
/// (spec.md §3 ownership summary).
pub struct Rotator {
    pool: Arc<Pool>,
    breakers: Arc<CircuitBreakerRegistry>,
    metrics: Arc<MetricsAggregator>,
    executor: RetryExecutor,
    strategy: Adaptive<Arc<dyn Strategy>>,
    retry_policy: Adaptive<RetryPolicy>,
}

impl Rotator {
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        RotatorBuilder::new(dispatcher).build()
    }

    pub fn builder(dispatcher: Arc<dyn Dispatcher>) -> RotatorBuilder {
        RotatorBuilder::new(dispatcher)
    }

    pub fn add_proxy(&self, proxy: Proxy) -> Result<(), PoolError> {
        self.pool.add(proxy)
    }

    pub fn remove_proxy(&self, id: &str) -> Result<Proxy, PoolError> {
        let removed = self.pool.remove(id)?;
        self.breakers.remove(id);
        Ok(removed)
    }

    pub fn update_proxy<F: FnOnce(&mut Proxy)>(&self, id: &str, mutator: F) -> Result<(), PoolError> {
        self.pool.update(id, mutator)
    }

    pub fn set_strategy(&self, strategy: Arc<dyn Strategy>) {
        self.strategy.set(strategy);
    }

    pub fn set_retry_policy(&self, policy: RetryPolicy) {
        self.retry_policy.set(policy);
    }

    pub fn reset_circuit(&self, proxy_id: &str) {
        if let Some(event) = self.breakers.reset(proxy_id) {
            self.metrics.record_breaker_event(event);
        }
    }

    pub fn circuit_state(&self, proxy_id: &str) -> Option<CircuitState> {
        self.breakers.state(proxy_id)
    }

    pub fn pool_snapshot(&self) -> (u64, Vec<ProxyView>) {
        self.pool.snapshot()
    }

    pub fn metrics_summary(&self) -> MetricsSummary {
        self.metrics.summary()
    }

    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    /// Async form of `request`. Both this and `request_blocking` call the
    /// same [`RetryExecutor`] (spec.md §5 scheduling model).
    pub async fn request(
        &self,
        url: &str,
        options: RequestOptions,
        cancellation: &CancellationToken,
    ) -> Result<Response, RotatorError> {
        let strategy = self.strategy.get();
        let policy = self.retry_policy.get();
        self.executor.execute(strategy.as_ref().as_ref(), &policy, url, options, cancellation).await
    }

    /// Blocking form, for callers outside a tokio runtime. Uses a lazily
    /// initialized single-threaded runtime shared across calls.
    pub fn request_blocking(
        &self,
        url: &str,
        options: RequestOptions,
        cancellation: &CancellationToken,
    ) -> Result<Response, RotatorError> {
        blocking_runtime().block_on(self.request(url, options, cancellation))
    }
}

fn blocking_runtime() -> &'static tokio::runtime::Runtime {
    static RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to start blocking rotator runtime")
    })
}

pub struct RotatorBuilder {
    dispatcher: Arc<dyn Dispatcher>,
    strategy: Arc<dyn Strategy>,
    retry_policy: RetryPolicy,
    breaker_config: CircuitBreakerConfig,
    rate_limit_config: RateLimitConfig,
    metrics: Arc<MetricsAggregator>,
}

impl RotatorBuilder {
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            dispatcher,
            strategy: Arc::new(RoundRobin::new()),
            retry_policy: RetryPolicy::default(),
            breaker_config: CircuitBreakerConfig::default(),
            rate_limit_config: RateLimitConfig::disabled(),
            metrics: Arc::new(MetricsAggregator::new()),
        }
    }

    pub fn strategy(mut self, strategy: Arc<dyn Strategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    pub fn rate_limit_config(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit_config = config;
        self
    }

    pub fn build(self) -> Rotator {
        let pool = Arc::new(Pool::new());
        let breakers = Arc::new(CircuitBreakerRegistry::new(self.breaker_config));
        let rate_limiter = Arc::new(RateLimiter::new(self.rate_limit_config));
        let executor = RetryExecutor::new(
            Arc::clone(&pool),
            Arc::clone(&breakers),
            rate_limiter,
            self.dispatcher,
            Arc::clone(&self.metrics),
        );

        Rotator {
            pool,
            breakers,
            metrics: self.metrics,
            executor,
            strategy: Adaptive::new(self.strategy),
            retry_policy: Adaptive::new(self.retry_policy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{DispatchErrorKind, DispatchRequest};
    use crate::proxy::{Endpoint, Scheme};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AlwaysOk;

    #[async_trait]
    impl Dispatcher for AlwaysOk {
        async fn dispatch(
            &self,
            _request: DispatchRequest,
            proxy: &Endpoint,
            _cancellation: &CancellationToken,
        ) -> Result<Response, DispatchErrorKind> {
            Ok(Response {
                status: 200,
                headers: Default::default(),
                body: Vec::new(),
                elapsed_ms: 1,
                proxy_id: proxy.id(),
            })
        }
    }

    struct CountingThenOk {
        calls: AtomicUsize,
        fail_first_n: usize,
    }

    #[async_trait]
    impl Dispatcher for CountingThenOk {
        async fn dispatch(
            &self,
            _request: DispatchRequest,
            proxy: &Endpoint,
            _cancellation: &CancellationToken,
        ) -> Result<Response, DispatchErrorKind> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                Err(DispatchErrorKind::Connect)
            } else {
                Ok(Response {
                    status: 200,
                    headers: Default::default(),
                    body: Vec::new(),
                    elapsed_ms: 1,
                    proxy_id: proxy.id(),
                })
            }
        }
    }

    #[tokio::test]
    async fn request_returns_success_through_a_single_proxy() {
        let rotator = Rotator::new(Arc::new(AlwaysOk));
        rotator.add_proxy(Proxy::new(Endpoint::new(Scheme::Http, "h", 80)).unwrap()).unwrap();

        let options = RequestOptions::new(
            crate::dispatcher::Method::Get,
            "client-1",
            std::time::Duration::from_secs(1),
        );
        let result = rotator.request("https://example.com", options, &CancellationToken::new()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn request_fails_with_no_proxy_available_on_empty_pool() {
        let rotator = Rotator::new(Arc::new(AlwaysOk));
        let options = RequestOptions::new(
            crate::dispatcher::Method::Get,
            "client-1",
            std::time::Duration::from_secs(1),
        );
        let result = rotator.request("https://example.com", options, &CancellationToken::new()).await;
        assert!(matches!(result, Err(RotatorError::NoProxyAvailable)));
    }

    #[tokio::test]
    async fn request_retries_through_backoff_then_succeeds() {
        let dispatcher = Arc::new(CountingThenOk { calls: AtomicUsize::new(0), fail_first_n: 1 });
        let rotator = Rotator::builder(dispatcher)
            .retry_policy(
                RetryPolicy::new(
                    3,
                    crate::backoff::Backoff::fixed(
                        std::time::Duration::from_millis(100),
                        std::time::Duration::from_secs(1),
                    )
                    .unwrap(),
                    crate::jitter::JitterRatio::none(),
                )
                .unwrap(),
            )
            .build();
        rotator.add_proxy(Proxy::new(Endpoint::new(Scheme::Http, "h", 80)).unwrap()).unwrap();

        let options = RequestOptions::new(
            crate::dispatcher::Method::Get,
            "client-1",
            std::time::Duration::from_secs(1),
        );
        let result = rotator.request("https://example.com", options, &CancellationToken::new()).await;
        assert!(result.is_ok());
    }

    #[test]
    fn request_blocking_works_outside_a_tokio_runtime() {
        let rotator = Rotator::new(Arc::new(AlwaysOk));
        rotator.add_proxy(Proxy::new(Endpoint::new(Scheme::Http, "h", 80)).unwrap()).unwrap();
        let options = RequestOptions::new(
            crate::dispatcher::Method::Get,
            "client-1",
            std::time::Duration::from_secs(1),
        );
        let result = rotator.request_blocking("https://example.com", options, &CancellationToken::new());
        assert!(result.is_ok());
    }
}
