//! Per-attempt event ingestion, hourly rollup, and the query surface
//! (spec.md §4.7).

use crate::circuit_breaker::BreakerEvent;
use crate::clock::{Clock, MonotonicClock};
use hdrhistogram::Histogram;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const RETENTION_MILLIS: u64 = 24 * 60 * 60 * 1000;
const HOUR_MILLIS: u64 = 60 * 60 * 1000;
const DEFAULT_MAX_EVENTS: usize = 240_000; // ~10k req/h * 24h

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcomeKind {
    Success,
    Retryable,
    NonRetryable,
}

/// One attempt event (spec.md §3 RetryAttempt event).
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    pub timestamp_millis: u64,
    pub proxy_id: String,
    pub attempt_no: usize,
    pub outcome: AttemptOutcomeKind,
    pub latency_ms: u64,
    pub retried_after_delay_ms: Option<u64>,
}

struct HourlyBucket {
    hour_start_millis: u64,
    total: u64,
    success_by_attempt: HashMap<usize, u64>,
    retries: u64,
    histogram: Histogram<u64>,
}

impl HourlyBucket {
    fn new(hour_start_millis: u64) -> Self {
        Self {
            hour_start_millis,
            total: 0,
            success_by_attempt: HashMap::new(),
            retries: 0,
            histogram: Histogram::new(3).expect("static histogram bounds are valid"),
        }
    }

    fn record(&mut self, attempt: &RetryAttempt) {
        self.total += 1;
        if attempt.outcome == AttemptOutcomeKind::Success {
            *self.success_by_attempt.entry(attempt.attempt_no).or_insert(0) += 1;
        }
        if attempt.attempt_no > 0 {
            self.retries += 1;
        }
        let _ = self.histogram.record(attempt.latency_ms.max(1));
    }
}

#[derive(Debug, Clone)]
pub struct HourlyPoint {
    pub hour_start_millis: u64,
    pub total: u64,
    pub retries: u64,
    pub mean_latency_ms: f64,
    pub p50_ms: u64,
    pub p95_ms: u64,
}

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub total: u64,
    pub retries: u64,
    pub success_by_attempt: HashMap<usize, u64>,
    pub circuit_breaker_events: u64,
}

#[derive(Debug, Clone)]
pub struct ProxyMetricsSummary {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub mean_latency_ms: f64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub most_recent_outcome: Option<AttemptOutcomeKind>,
}

struct ProxyAccumulator {
    total: u64,
    succeeded: u64,
    failed: u64,
    histogram: Histogram<u64>,
    most_recent_outcome: Option<AttemptOutcomeKind>,
}

impl ProxyAccumulator {
    fn new() -> Self {
        Self {
            total: 0,
            succeeded: 0,
            failed: 0,
            histogram: Histogram::new(3).expect("static histogram bounds are valid"),
            most_recent_outcome: None,
        }
    }

    fn record(&mut self, attempt: &RetryAttempt) {
        self.total += 1;
        match attempt.outcome {
            AttemptOutcomeKind::Success => self.succeeded += 1,
            _ => self.failed += 1,
        }
        let _ = self.histogram.record(attempt.latency_ms.max(1));
        self.most_recent_outcome = Some(attempt.outcome);
    }
}

/// Bounded ring buffer of attempt events plus hourly rollup state
/// (spec.md §4.7). All mutation happens through `record`; rollup is
/// maintained incrementally rather than batched, so queries are always
/// current without a separate compaction pass.
pub struct MetricsAggregator {
    events: Mutex<VecDeque<RetryAttempt>>,
    buckets: Mutex<HashMap<u64, HourlyBucket>>,
    per_proxy: Mutex<HashMap<String, ProxyAccumulator>>,
    breaker_event_count: AtomicU64,
    max_events: usize,
    clock: Arc<dyn Clock>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::with_clock_and_capacity(Arc::new(MonotonicClock::default()), DEFAULT_MAX_EVENTS)
    }

    pub fn with_clock_and_capacity(clock: Arc<dyn Clock>, max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            buckets: Mutex::new(HashMap::new()),
            per_proxy: Mutex::new(HashMap::new()),
            breaker_event_count: AtomicU64::new(0),
            max_events,
            clock,
        }
    }

    pub fn record(&self, attempt: RetryAttempt) {
        let hour = attempt.timestamp_millis - (attempt.timestamp_millis % HOUR_MILLIS);

        {
            let mut buckets = self.buckets.lock().unwrap_or_else(|p| p.into_inner());
            buckets.entry(hour).or_insert_with(|| HourlyBucket::new(hour)).record(&attempt);
        }
        {
            let mut per_proxy = self.per_proxy.lock().unwrap_or_else(|p| p.into_inner());
            per_proxy.entry(attempt.proxy_id.clone()).or_insert_with(ProxyAccumulator::new).record(&attempt);
        }

        let mut events = self.events.lock().unwrap_or_else(|p| p.into_inner());
        events.push_back(attempt);
        while events.len() > self.max_events {
            events.pop_front();
        }
    }

    pub fn record_breaker_event(&self, event: BreakerEvent) {
        tracing::debug!(from = ?event.from, to = ?event.to, "circuit breaker transition recorded");
        self.breaker_event_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Drops events and hourly buckets older than the 24h retention cap.
    /// Intended to run periodically on a background worker (spec.md §4.7).
    pub fn prune_expired(&self) {
        let now = self.clock.now_millis();
        let cutoff = now.saturating_sub(RETENTION_MILLIS);

        let mut events = self.events.lock().unwrap_or_else(|p| p.into_inner());
        while events.front().map(|e| e.timestamp_millis < cutoff).unwrap_or(false) {
            events.pop_front();
        }
        drop(events);

        let mut buckets = self.buckets.lock().unwrap_or_else(|p| p.into_inner());
        buckets.retain(|&hour_start, _| hour_start >= cutoff);
    }

    pub fn summary(&self) -> MetricsSummary {
        let buckets = self.buckets.lock().unwrap_or_else(|p| p.into_inner());
        let mut total = 0;
        let mut retries = 0;
        let mut success_by_attempt = HashMap::new();
        for bucket in buckets.values() {
            total += bucket.total;
            retries += bucket.retries;
            for (attempt_no, count) in &bucket.success_by_attempt {
                *success_by_attempt.entry(*attempt_no).or_insert(0) += count;
            }
        }
        MetricsSummary {
            total,
            retries,
            success_by_attempt,
            circuit_breaker_events: self.breaker_event_count.load(Ordering::Relaxed),
        }
    }

    pub fn timeseries(&self) -> Vec<HourlyPoint> {
        let mut buckets = self.buckets.lock().unwrap_or_else(|p| p.into_inner());
        let mut points: Vec<HourlyPoint> = buckets
            .values_mut()
            .map(|b| HourlyPoint {
                hour_start_millis: b.hour_start_millis,
                total: b.total,
                retries: b.retries,
                mean_latency_ms: b.histogram.mean(),
                p50_ms: b.histogram.value_at_quantile(0.50),
                p95_ms: b.histogram.value_at_quantile(0.95),
            })
            .collect();
        points.sort_by_key(|p| p.hour_start_millis);
        points
    }

    pub fn by_proxy(&self, proxy_id: &str) -> Option<ProxyMetricsSummary> {
        let per_proxy = self.per_proxy.lock().unwrap_or_else(|p| p.into_inner());
        per_proxy.get(proxy_id).map(|acc| ProxyMetricsSummary {
            total: acc.total,
            succeeded: acc.succeeded,
            failed: acc.failed,
            mean_latency_ms: acc.histogram.mean(),
            p50_ms: acc.histogram.value_at_quantile(0.50),
            p95_ms: acc.histogram.value_at_quantile(0.95),
            most_recent_outcome: acc.most_recent_outcome,
        })
    }

    /// Spawns a background task that prunes expired events/buckets every
    /// 5 minutes (spec.md §4.7 rollup cadence).
    pub fn spawn_rollup_worker(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(5 * 60));
            loop {
                interval.tick().await;
                this.prune_expired();
            }
        })
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}
