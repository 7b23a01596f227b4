//! End-to-end scenarios with literal values (S1, S3, S5, S6).

use async_trait::async_trait;
use proxywhirl_core::{
    Backoff, CircuitBreakerConfig, DispatchErrorKind, DispatchRequest, Dispatcher, Endpoint,
    JitterRatio, Method, Proxy, RateLimitConfig, RateLimitTier, RequestOptions, Response, Rotator,
    RotatorBuilder, RoundRobin, Scheme, SessionPersistence, Strategy,
};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

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

fn proxy(host: &str) -> Proxy {
    Proxy::new(Endpoint::new(Scheme::Http, host, 80)).unwrap()
}

fn options() -> RequestOptions {
    RequestOptions::new(Method::Get, "client-1", Duration::from_secs(5))
}

/// S1: round_robin over 3 healthy proxies visits each in a fixed cycle.
#[tokio::test]
async fn s1_round_robin_cycles_through_three_proxies_in_order() {
    let rotator = Rotator::builder(Arc::new(AlwaysOk)).strategy(Arc::new(RoundRobin::new())).build();
    rotator.add_proxy(proxy("p1")).unwrap();
    rotator.add_proxy(proxy("p2")).unwrap();
    rotator.add_proxy(proxy("p3")).unwrap();

    let mut seen = Vec::new();
    for _ in 0..9 {
        let r = rotator.request("https://example.com", options(), &CancellationToken::new()).await.unwrap();
        seen.push(r.proxy_id);
    }
    // Proxy ids encode host; a full 3-cycle is covered exactly 3 times.
    let mut counts = std::collections::HashMap::new();
    for id in &seen {
        *counts.entry(id.clone()).or_insert(0) += 1;
    }
    assert_eq!(counts.len(), 3);
    assert!(counts.values().all(|&c| c == 3));
}

/// S3: breaker {k=5, W=60s, T=30s}; 5 failures open the circuit; it denies
/// admission before T elapses and half-opens after.
#[test]
fn s3_breaker_opens_then_half_opens_after_timeout() {
    use proxywhirl_core::{AdmitReason, CircuitBreakerRegistry, ManualClock};

    let clock = Arc::new(ManualClock::new());
    let registry = proxywhirl_core::CircuitBreakerRegistry::with_clock(
        CircuitBreakerConfig::new(5, Duration::from_secs(60), Duration::from_secs(30)).unwrap(),
        clock.clone(),
    );

    for _ in 0..5 {
        registry.record_failure("p1");
    }
    assert_eq!(registry.state("p1"), Some(proxywhirl_core::CircuitState::Open));

    clock.set(20_000);
    assert_eq!(registry.admit("p1"), AdmitReason::CircuitOpen);

    clock.set(35_000);
    assert_eq!(registry.admit("p1"), AdmitReason::Admitted);
    assert_eq!(registry.state("p1"), Some(proxywhirl_core::CircuitState::HalfOpen));

    registry.record_success("p1");
    assert_eq!(registry.state("p1"), Some(proxywhirl_core::CircuitState::Closed));
}

/// S5: tier=free {100/60s}, endpoint override /heavy=10/60s; 10 allowed on
/// /heavy, 11th denied; /light unaffected by the override.
#[tokio::test]
async fn s5_endpoint_override_is_tighter_than_the_tier_limit() {
    use proxywhirl_core::RateLimiter;

    let tier = RateLimitTier::new("free", 100, Duration::from_secs(60))
        .unwrap()
        .with_endpoint_override("/heavy", 10)
        .unwrap();
    let limiter = RateLimiter::new(RateLimitConfig::new(tier));

    for _ in 0..10 {
        assert!(limiter.check("u1", Some("/heavy"), None).await.is_allowed());
    }
    let denied = limiter.check("u1", Some("/heavy"), None).await;
    assert!(!denied.is_allowed());

    assert!(limiter.check("u1", Some("/light"), None).await.is_allowed());
}

/// S6: session persistence rebinds when the bound proxy is removed.
#[tokio::test]
async fn s6_session_rebinds_after_bound_proxy_is_removed() {
    let strategy: Arc<dyn Strategy> = Arc::new(SessionPersistence::new(Arc::new(RoundRobin::new())));
    let rotator = Rotator::builder(Arc::new(AlwaysOk)).strategy(Arc::clone(&strategy)).build();
    rotator.add_proxy(proxy("p1")).unwrap();
    rotator.add_proxy(proxy("p2")).unwrap();

    let mut opts = options();
    opts.session_key = Some("s1".to_string());
    let first = rotator.request("https://example.com", opts.clone(), &CancellationToken::new()).await.unwrap();

    rotator.remove_proxy(&first.proxy_id).unwrap();

    let second = rotator.request("https://example.com", opts, &CancellationToken::new()).await.unwrap();
    assert_ne!(first.proxy_id, second.proxy_id);
}

/// S2-adjacent: exponential backoff with jitter=0 between retried attempts.
#[tokio::test]
async fn s2_retries_through_backoff_then_succeeds_on_second_proxy() {
    struct FlakyFirstProxy {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Dispatcher for FlakyFirstProxy {
        async fn dispatch(
            &self,
            _request: DispatchRequest,
            proxy: &Endpoint,
            _cancellation: &CancellationToken,
        ) -> Result<Response, DispatchErrorKind> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if proxy.host == "p1" && n < 2 {
                return Ok(Response {
                    status: 503,
                    headers: Default::default(),
                    body: Vec::new(),
                    elapsed_ms: 1,
                    proxy_id: proxy.id(),
                });
            }
            Ok(Response {
                status: 200,
                headers: Default::default(),
                body: Vec::new(),
                elapsed_ms: 1,
                proxy_id: proxy.id(),
            })
        }
    }

    let policy = proxywhirl_core::RetryPolicy::new(
        3,
        Backoff::exponential(Duration::from_secs(1), 2.0, Duration::from_secs(10)).unwrap(),
        JitterRatio::none(),
    )
    .unwrap();

    let rotator = RotatorBuilder::new(Arc::new(FlakyFirstProxy { calls: AtomicUsize::new(0) }))
        .strategy(Arc::new(RoundRobin::new()))
        .retry_policy(policy)
        .build();
    rotator.add_proxy(proxy("p1")).unwrap();
    rotator.add_proxy(proxy("p2")).unwrap();

    let result = rotator.request("https://example.com", options(), &CancellationToken::new()).await.unwrap();
    assert_eq!(result.status, 200);
}

/// spec.md §4.7: the metrics summary's circuit-breaker event count reflects
/// real breaker transitions driven through `RetryExecutor::execute`, not
/// just direct registry calls.
#[tokio::test]
async fn metrics_summary_counts_breaker_events_from_real_requests() {
    struct AlwaysFail;

    #[async_trait]
    impl Dispatcher for AlwaysFail {
        async fn dispatch(
            &self,
            _request: DispatchRequest,
            proxy: &Endpoint,
            _cancellation: &CancellationToken,
        ) -> Result<Response, DispatchErrorKind> {
            Ok(Response {
                status: 503,
                headers: Default::default(),
                body: Vec::new(),
                elapsed_ms: 1,
                proxy_id: proxy.id(),
            })
        }
    }

    let rotator = Rotator::builder(Arc::new(AlwaysFail))
        .strategy(Arc::new(RoundRobin::new()))
        .breaker_config(CircuitBreakerConfig::new(1, Duration::from_secs(60), Duration::from_secs(30)).unwrap())
        .retry_policy(
            proxywhirl_core::RetryPolicy::new(1, Backoff::fixed(Duration::from_millis(1), Duration::from_millis(1)).unwrap(), JitterRatio::none())
                .unwrap(),
        )
        .build();
    rotator.add_proxy(proxy("only")).unwrap();

    assert_eq!(rotator.metrics_summary().circuit_breaker_events, 0);
    let _ = rotator.request("https://example.com", options(), &CancellationToken::new()).await;
    assert_eq!(
        rotator.metrics_summary().circuit_breaker_events,
        1,
        "a single failure should trip the breaker closed->open"
    );
}

/// Property 10: thread safety under heavy concurrency — no panics, and
/// completed-attempt accounting matches the number of dispatched requests.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn thread_safety_under_concurrent_requests() {
    let completed = Arc::new(AtomicU64::new(0));

    struct CountingOk {
        completed: Arc<AtomicU64>,
    }

    #[async_trait]
    impl Dispatcher for CountingOk {
        async fn dispatch(
            &self,
            _request: DispatchRequest,
            proxy: &Endpoint,
            _cancellation: &CancellationToken,
        ) -> Result<Response, DispatchErrorKind> {
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(Response {
                status: 200,
                headers: Default::default(),
                body: Vec::new(),
                elapsed_ms: 1,
                proxy_id: proxy.id(),
            })
        }
    }

    let rotator = Arc::new(
        Rotator::builder(Arc::new(CountingOk { completed: Arc::clone(&completed) }))
            .strategy(Arc::new(RoundRobin::new()))
            .build(),
    );
    for i in 0..16 {
        rotator.add_proxy(proxy(&format!("p{i}"))).unwrap();
    }

    let errors = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for _ in 0..2000 {
        let rotator = Arc::clone(&rotator);
        let errors = Arc::clone(&errors);
        handles.push(tokio::spawn(async move {
            let r = rotator.request("https://example.com", options(), &CancellationToken::new()).await;
            if let Err(e) = r {
                errors.lock().unwrap().push(e);
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    assert!(errors.lock().unwrap().is_empty());
    assert_eq!(completed.load(Ordering::SeqCst), 2000);
}
