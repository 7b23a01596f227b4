#![forbid(unsafe_code)]

//! # ProxyWhirl Core
//!
//! A proxy-rotation control plane: a proxy pool, pluggable selection
//! strategies, per-proxy circuit breakers, a sliding-window rate limiter, and
//! a retry executor that ties them together. This crate defines the contract
//! and the policy logic; HTTP transport is supplied by the embedder through
//! the [`Dispatcher`] trait.
//!
//! ## Quick Start
//!
//! ```rust
//! use proxywhirl_core::{DispatchErrorKind, DispatchRequest, Dispatcher, Endpoint, Proxy,
//!     RequestOptions, Response, Rotator, Scheme};
//! use async_trait::async_trait;
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! struct EchoDispatcher;
//!
//! #[async_trait]
//! impl Dispatcher for EchoDispatcher {
//!     async fn dispatch(
//!         &self,
//!         _request: DispatchRequest,
//!         proxy: &Endpoint,
//!         _cancellation: &CancellationToken,
//!     ) -> Result<Response, DispatchErrorKind> {
//!         Ok(Response {
//!             status: 200,
//!             headers: Default::default(),
//!             body: Vec::new(),
//!             elapsed_ms: 1,
//!             proxy_id: proxy.id(),
//!         })
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let rotator = Rotator::new(Arc::new(EchoDispatcher));
//! rotator
//!     .add_proxy(Proxy::new(Endpoint::new(Scheme::Http, "proxy.example.com", 8080)).unwrap())
//!     .unwrap();
//!
//! let options = RequestOptions::new(
//!     proxywhirl_core::Method::Get,
//!     "client-1",
//!     Duration::from_secs(10),
//! );
//! let response = rotator
//!     .request("https://api.example.com/v1/widgets", options, &CancellationToken::new())
//!     .await
//!     .unwrap();
//! assert_eq!(response.status, 200);
//! # }
//! ```
//!
//! ## Concurrency model
//!
//! Locks are always acquired pool-write, then per-proxy-stats, then breaker,
//! then rate-limiter key, then metrics — never the reverse. Selection
//! strategies operate on an already-filtered snapshot and take no locks.

mod adaptive;
mod backoff;
mod circuit_breaker;
mod circuit_breaker_registry;
mod clock;
mod dispatcher;
mod error;
mod jitter;
mod metrics;
mod pool;
mod proxy;
mod rate_limit;
mod retry;
mod rotator;
mod selection;
mod sleeper;

pub use adaptive::Adaptive;
pub use backoff::Backoff;
pub use circuit_breaker::{AdmitReason, BreakerEvent, CircuitBreakerConfig, CircuitState};
pub use circuit_breaker_registry::CircuitBreakerRegistry;
pub use clock::{Clock, MonotonicClock};
pub use dispatcher::{
    refuses_unsafe_target, DispatchErrorKind, DispatchRequest, Dispatcher, Method, Response,
};
pub use error::{AttemptFailure, ConfigurationError, PoolError, RotatorError, MAX_RETAINED_FAILURES};
pub use jitter::JitterRatio;
pub use metrics::{
    AttemptOutcomeKind, HourlyPoint, MetricsAggregator, MetricsSummary, ProxyMetricsSummary,
    RetryAttempt,
};
pub use pool::Pool;
pub use proxy::{Endpoint, Health, Proxy, ProxyStats, ProxyView, Scheme, StatsSnapshot};
pub use rate_limit::{
    InMemoryRateLimitStore, RateLimitConfig, RateLimitDecision, RateLimitStore, RateLimitTier,
    RateLimiter,
};
pub use retry::{RequestOptions, RetryExecutor, RetryPolicy};
pub use rotator::{Rotator, RotatorBuilder};
pub use selection::{
    CompositeStrategy, GeoTargeted, LeastUsed, PerformanceBased, Random, RoundRobin,
    SelectionContext, SessionPersistence, Strategy, Weighted,
};
pub use sleeper::{Sleeper, TokioSleeper};

#[cfg(feature = "test-util")]
pub use clock::testing::ManualClock;
#[cfg(feature = "test-util")]
pub use sleeper::testing::{InstantSleeper, TrackingSleeper};

#[cfg(feature = "tower-middleware")]
pub use rate_limit::middleware::{IdentityExtractor, RateLimitLayer, RateLimitService};
