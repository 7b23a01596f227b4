//! Admission control keyed by an identifier string (spec.md §4.4).
//!
//! # Architecture
//!
//! - [`RateLimiter`]: ties a [`RateLimitConfig`] to a [`store::RateLimitStore`]
//!   and resolves tier/endpoint precedence.
//! - [`store`]: the sliding-window counter storage interface, with an
//!   in-memory default; a distributed backend plugs in behind the same trait.
//! - [`middleware`]: optional `tower` `Layer`/`Service` wrapping a limiter,
//!   gated behind the `tower-middleware` feature.

pub mod limiter;
pub mod store;

#[cfg(feature = "tower-middleware")]
pub mod middleware;

pub use limiter::RateLimiter;
pub use store::{InMemoryRateLimitStore, RateLimitStore};

use crate::error::ConfigurationError;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Outcome of one admission check.
#[derive(Debug, Clone, PartialEq)]
pub enum RateLimitDecision {
    Allowed { remaining: u32, reset_at_millis: u64 },
    Denied { retry_after: Duration },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// One named tier with a base limit and per-endpoint overrides.
#[derive(Debug, Clone)]
pub struct RateLimitTier {
    pub name: String,
    pub requests_per_window: u32,
    pub window_size: Duration,
    pub endpoints: HashMap<String, u32>,
}

impl RateLimitTier {
    pub fn new(
        name: impl Into<String>,
        requests_per_window: u32,
        window_size: Duration,
    ) -> Result<Self, ConfigurationError> {
        if requests_per_window == 0 {
            return Err(ConfigurationError::new("requests_per_window", "must be > 0"));
        }
        if window_size.is_zero() {
            return Err(ConfigurationError::new("window_size", "must be > 0"));
        }
        Ok(Self { name: name.into(), requests_per_window, window_size, endpoints: HashMap::new() })
    }

    /// Add a per-endpoint override. Rejected if `limit` would *loosen* the
    /// tier's base limit — endpoint overrides may only tighten it.
    pub fn with_endpoint_override(
        mut self,
        endpoint: impl Into<String>,
        limit: u32,
    ) -> Result<Self, ConfigurationError> {
        if limit > self.requests_per_window {
            return Err(ConfigurationError::new(
                "endpoint_override",
                format!(
                    "override limit {limit} exceeds tier limit {} for `{}`",
                    self.requests_per_window,
                    self.name
                ),
            ));
        }
        self.endpoints.insert(endpoint.into(), limit);
        Ok(self)
    }

    /// The effective limit for `endpoint`: the per-endpoint override if one
    /// is configured, otherwise the tier's base limit (spec.md §4.4
    /// hierarchical precedence).
    fn effective_limit(&self, endpoint: Option<&str>) -> u32 {
        match endpoint.and_then(|e| self.endpoints.get(e)) {
            Some(&override_limit) => override_limit,
            None => self.requests_per_window,
        }
    }
}

/// Validated rate-limit configuration (spec.md §4.4).
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub default_tier: String,
    pub tiers: Vec<RateLimitTier>,
    pub whitelist: HashSet<String>,
}

impl RateLimitConfig {
    pub fn new(default_tier: RateLimitTier) -> Self {
        let name = default_tier.name.clone();
        Self { enabled: true, default_tier: name, tiers: vec![default_tier], whitelist: HashSet::new() }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            default_tier: String::new(),
            tiers: Vec::new(),
            whitelist: HashSet::new(),
        }
    }

    pub fn with_tier(mut self, tier: RateLimitTier) -> Self {
        self.tiers.push(tier);
        self
    }

    pub fn with_whitelisted(mut self, identifier: impl Into<String>) -> Self {
        self.whitelist.insert(identifier.into());
        self
    }

    fn tier(&self, name: &str) -> Option<&RateLimitTier> {
        self.tiers.iter().find(|t| t.name == name)
    }
}
