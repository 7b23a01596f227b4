//! Proxy identity, endpoint, and live statistics (spec.md §3).

use crate::clock::{Clock, MonotonicClock};
use crate::error::ConfigurationError;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Forward-proxy wire scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
    Socks4,
    Socks5,
}

impl Scheme {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Socks4 => "socks4",
            Self::Socks5 => "socks5",
        }
    }
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Proxy connection endpoint. `password` is a secret: it is used only to
/// build the outbound proxy CONNECT/auth, and is never part of `id()`,
/// `Display`, logs, or metric labels.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    password: Option<String>,
}

impl Endpoint {
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16) -> Self {
        Self { scheme, host: host.into(), port, username: None, password: None }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    fn host_for_url(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }

    /// Stable identity derived from scheme+host+port+username. Two
    /// `Endpoint`s that differ only by password collide on purpose: the
    /// password is not part of identity.
    pub fn id(&self) -> String {
        match &self.username {
            Some(user) => format!("{}://{}@{}:{}", self.scheme, user, self.host_for_url(), self.port),
            None => format!("{}://{}:{}", self.scheme, self.host_for_url(), self.port),
        }
    }

    /// Wire URL including URL-encoded credentials, for handing to the
    /// dispatcher's transport layer. Never log or export this value.
    pub fn connect_url(&self) -> String {
        let auth = match (&self.username, &self.password) {
            (Some(u), Some(p)) => format!("{}:{}@", encode(u), encode(p)),
            (Some(u), None) => format!("{}@", encode(u)),
            _ => String::new(),
        };
        format!("{}://{}{}:{}", self.scheme, auth, self.host_for_url(), self.port)
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

fn encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// Observability-only derived health summary. Selection never reads this
/// field; it consults breaker admission instead (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Default)]
struct StatsInner {
    requests_started: u64,
    requests_active: u64,
    requests_completed: u64,
    requests_succeeded: u64,
    requests_failed: u64,
    ema_response_time_ms: Option<f64>,
    window_start: Option<Instant>,
    window_requests: u64,
    window_successes: u64,
    last_success_at: Option<Instant>,
    last_success_at_millis: Option<u64>,
    last_failure_at: Option<Instant>,
    consecutive_failures: u64,
}

/// Mutable, per-proxy statistics. Guarded by a single mutex; all mutation
/// happens inside `record_outcome`/`start_attempt`, never from selection
/// strategies (spec.md §4.1 invariant).
#[derive(Debug)]
pub struct ProxyStats {
    inner: Mutex<StatsInner>,
    ema_alpha: f64,
    window_duration: Duration,
    clock: Arc<dyn Clock>,
}

/// Snapshot of a proxy's live statistics, safe to read without a lock.
#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    pub requests_started: u64,
    pub requests_active: u64,
    pub requests_completed: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub ema_response_time_ms: Option<f64>,
    pub consecutive_failures: u64,
    pub has_succeeded: bool,
    pub last_success_at_millis: Option<u64>,
}

impl StatsSnapshot {
    pub fn success_rate(&self) -> f64 {
        self.requests_succeeded as f64 / (self.requests_completed.max(1) as f64)
    }
}

impl ProxyStats {
    pub fn new(ema_alpha: f64, window_duration: Duration) -> Result<Self, ConfigurationError> {
        Self::with_clock(ema_alpha, window_duration, Arc::new(MonotonicClock::default()))
    }

    pub fn with_clock(
        ema_alpha: f64,
        window_duration: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigurationError> {
        if !(0.0..=1.0).contains(&ema_alpha) || ema_alpha == 0.0 {
            return Err(ConfigurationError::new(
                "ema_alpha",
                format!("must be in (0, 1], got {ema_alpha}"),
            ));
        }
        Ok(Self { inner: Mutex::new(StatsInner::default()), ema_alpha, window_duration, clock })
    }

    pub fn start_attempt(&self) {
        let mut s = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        s.requests_started += 1;
        s.requests_active += 1;
    }

    /// Record the outcome of one attempt. `success` drives the EMA/health
    /// counters; `latency` is only folded into the EMA on success.
    pub fn record_outcome(&self, success: bool, latency: Duration) {
        let mut s = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        s.requests_active = s.requests_active.saturating_sub(1);
        s.requests_completed += 1;

        let now = Instant::now();
        match s.window_start {
            Some(start) if now.duration_since(start) >= self.window_duration => {
                s.window_start = Some(now);
                s.window_requests = 0;
                s.window_successes = 0;
            }
            None => s.window_start = Some(now),
            _ => {}
        }
        s.window_requests += 1;

        if success {
            s.requests_succeeded += 1;
            s.window_successes += 1;
            s.last_success_at = Some(now);
            s.last_success_at_millis = Some(self.clock.now_millis());
            s.consecutive_failures = 0;
            let latency_ms = latency.as_secs_f64() * 1000.0;
            s.ema_response_time_ms = Some(match s.ema_response_time_ms {
                Some(prev) => self.ema_alpha * latency_ms + (1.0 - self.ema_alpha) * prev,
                None => latency_ms,
            });
        } else {
            s.requests_failed += 1;
            s.last_failure_at = Some(now);
            s.consecutive_failures += 1;
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let s = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        StatsSnapshot {
            requests_started: s.requests_started,
            requests_active: s.requests_active,
            requests_completed: s.requests_completed,
            requests_succeeded: s.requests_succeeded,
            requests_failed: s.requests_failed,
            ema_response_time_ms: s.ema_response_time_ms,
            consecutive_failures: s.consecutive_failures,
            has_succeeded: s.last_success_at.is_some(),
            last_success_at_millis: s.last_success_at_millis,
        }
    }

    /// Derived health summary for observability only.
    pub fn health(&self) -> Health {
        let snap = self.snapshot();
        if snap.requests_completed == 0 {
            return Health::Unknown;
        }
        let rate = snap.success_rate();
        if snap.consecutive_failures >= 5 {
            Health::Unhealthy
        } else if rate < 0.8 {
            Health::Degraded
        } else {
            Health::Healthy
        }
    }
}

/// A proxy record owned by the pool, keyed by `Endpoint::id()`.
#[derive(Debug)]
pub struct Proxy {
    pub endpoint: Endpoint,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub tags: BTreeSet<String>,
    pub stats: ProxyStats,
}

impl Proxy {
    pub fn new(endpoint: Endpoint) -> Result<Self, ConfigurationError> {
        Self::with_ema(endpoint, 0.3, Duration::from_secs(60))
    }

    pub fn with_ema(
        endpoint: Endpoint,
        ema_alpha: f64,
        window_duration: Duration,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self {
            endpoint,
            country_code: None,
            region: None,
            tags: BTreeSet::new(),
            stats: ProxyStats::new(ema_alpha, window_duration)?,
        })
    }

    pub fn id(&self) -> String {
        self.endpoint.id()
    }
}

/// Shallow, selection-relevant copy of a proxy; strategies only ever read
/// these (spec.md §4.1).
#[derive(Debug, Clone)]
pub struct ProxyView {
    pub id: String,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub tags: BTreeSet<String>,
    pub stats: StatsSnapshot,
    pub health: Health,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_excludes_password() {
        let ep = Endpoint::new(Scheme::Http, "proxy.example.com", 8080)
            .with_credentials("alice", "s3cr3t");
        assert_eq!(ep.id(), "http://alice@proxy.example.com:8080");
        assert!(!ep.id().contains("s3cr3t"));
    }

    #[test]
    fn connect_url_includes_encoded_credentials() {
        let ep = Endpoint::new(Scheme::Http, "proxy.example.com", 8080)
            .with_credentials("a l:ice", "p@ss");
        let url = ep.connect_url();
        assert!(url.contains("p%40ss"));
        assert!(url.contains("a%20l%3Aice"));
    }

    #[test]
    fn ipv6_host_is_bracketed() {
        let ep = Endpoint::new(Scheme::Socks5, "::1", 1080);
        assert_eq!(ep.id(), "socks5://[::1]:1080");
    }

    #[test]
    fn record_outcome_tracks_completed_invariant() {
        let proxy = Proxy::new(Endpoint::new(Scheme::Http, "h", 80)).unwrap();
        proxy.stats.start_attempt();
        proxy.stats.record_outcome(true, Duration::from_millis(50));
        proxy.stats.start_attempt();
        proxy.stats.record_outcome(false, Duration::from_millis(10));

        let snap = proxy.stats.snapshot();
        assert_eq!(snap.requests_completed, snap.requests_succeeded + snap.requests_failed);
        assert_eq!(snap.requests_active, 0);
        assert_eq!(snap.consecutive_failures, 1);
    }

    #[test]
    fn ema_only_updates_on_success() {
        let proxy = Proxy::with_ema(
            Endpoint::new(Scheme::Http, "h", 80),
            0.5,
            Duration::from_secs(60),
        )
        .unwrap();
        proxy.stats.start_attempt();
        proxy.stats.record_outcome(true, Duration::from_millis(100));
        assert_eq!(proxy.stats.snapshot().ema_response_time_ms, Some(100.0));

        proxy.stats.start_attempt();
        proxy.stats.record_outcome(true, Duration::from_millis(300));
        // 0.5*300 + 0.5*100 = 200
        assert_eq!(proxy.stats.snapshot().ema_response_time_ms, Some(200.0));

        proxy.stats.start_attempt();
        proxy.stats.record_outcome(false, Duration::from_millis(9999));
        assert_eq!(proxy.stats.snapshot().ema_response_time_ms, Some(200.0));
    }

    #[test]
    fn rejects_invalid_ema_alpha() {
        assert!(ProxyStats::new(0.0, Duration::from_secs(1)).is_err());
        assert!(ProxyStats::new(1.5, Duration::from_secs(1)).is_err());
        assert!(ProxyStats::new(0.3, Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn health_is_unhealthy_after_five_consecutive_failures() {
        let proxy = Proxy::new(Endpoint::new(Scheme::Http, "h", 80)).unwrap();
        for _ in 0..5 {
            proxy.stats.start_attempt();
            proxy.stats.record_outcome(false, Duration::from_millis(1));
        }
        assert_eq!(proxy.stats.health(), Health::Unhealthy);
    }
}
