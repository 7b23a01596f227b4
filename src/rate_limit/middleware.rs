//! Optional `tower` middleware wrapping a [`RateLimiter`], for embedders
//! that compose the rotator into a `tower::Service` stack. Gated behind the
//! `tower-middleware` feature; the core executor never depends on this.

use super::RateLimiter;
use crate::error::RotatorError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// Extracts the rate-limit identifier from a request.
pub trait IdentityExtractor<Req>: Send + Sync {
    fn identify(&self, req: &Req) -> String;
}

impl<Req, F> IdentityExtractor<Req> for F
where
    F: Fn(&Req) -> String + Send + Sync,
{
    fn identify(&self, req: &Req) -> String {
        self(req)
    }
}

#[derive(Clone)]
pub struct RateLimitLayer<E> {
    limiter: Arc<RateLimiter>,
    extractor: Arc<E>,
}

impl<E> RateLimitLayer<E> {
    pub fn new(limiter: Arc<RateLimiter>, extractor: E) -> Self {
        Self { limiter, extractor: Arc::new(extractor) }
    }
}

impl<S, E> Layer<S> for RateLimitLayer<E> {
    type Service = RateLimitService<S, E>;

    fn layer(&self, service: S) -> Self::Service {
        RateLimitService {
            inner: service,
            limiter: Arc::clone(&self.limiter),
            extractor: Arc::clone(&self.extractor),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S, E> {
    inner: S,
    limiter: Arc<RateLimiter>,
    extractor: Arc<E>,
}

impl<S, E, Req> Service<Req> for RateLimitService<S, E>
where
    S: Service<Req, Error = RotatorError> + Clone + Send + 'static,
    S::Future: Send + 'static,
    E: IdentityExtractor<Req> + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = RotatorError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let limiter = Arc::clone(&self.limiter);
        let identifier = self.extractor.identify(&req);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match limiter.check(&identifier, None, None).await {
                crate::rate_limit::RateLimitDecision::Allowed { .. } => inner.call(req).await,
                crate::rate_limit::RateLimitDecision::Denied { retry_after } => {
                    Err(RotatorError::RateLimited { retry_after })
                }
            }
        })
    }
}
