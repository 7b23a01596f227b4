//! Sliding-window counter storage, abstracted so a distributed backend can
//! stand in for the in-memory default (spec.md §4.4).

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Result of one atomic check-and-record against the sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOutcome {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at_millis: u64,
    pub retry_after_millis: u64,
}

/// Storage for the sliding-window counter. `check_and_record` must be atomic
/// across concurrent callers for the same key (spec.md §4.4): in-memory
/// implementations take a per-key lock; a distributed implementation runs
/// the check as a single server-side script.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn check_and_record(
        &self,
        key: &str,
        window: Duration,
        limit: u32,
        now_millis: u64,
    ) -> WindowOutcome;
}

/// In-memory sliding-window log: one `VecDeque` of admission timestamps per
/// key, pruned to `now - window` on every check.
#[derive(Debug, Default)]
pub struct InMemoryRateLimitStore {
    windows: RwLock<HashMap<String, Arc<Mutex<VecDeque<u64>>>>>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn window_for(&self, key: &str) -> Arc<Mutex<VecDeque<u64>>> {
        if let Some(w) = self.windows.read().unwrap_or_else(|p| p.into_inner()).get(key) {
            return Arc::clone(w);
        }
        let mut guard = self.windows.write().unwrap_or_else(|p| p.into_inner());
        Arc::clone(guard.entry(key.to_string()).or_insert_with(|| Arc::new(Mutex::new(VecDeque::new()))))
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn check_and_record(
        &self,
        key: &str,
        window: Duration,
        limit: u32,
        now_millis: u64,
    ) -> WindowOutcome {
        let window_millis = window.as_millis() as u64;
        let bucket = self.window_for(key);
        let mut timestamps = bucket.lock().unwrap_or_else(|p| p.into_inner());

        while let Some(&oldest) = timestamps.front() {
            if now_millis.saturating_sub(oldest) >= window_millis {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        let oldest_in_window = timestamps.front().copied();
        if (timestamps.len() as u32) < limit {
            timestamps.push_back(now_millis);
            let reset_at = oldest_in_window.unwrap_or(now_millis) + window_millis;
            WindowOutcome {
                allowed: true,
                remaining: limit - timestamps.len() as u32,
                reset_at_millis: reset_at,
                retry_after_millis: 0,
            }
        } else {
            let oldest = oldest_in_window.unwrap_or(now_millis);
            let retry_after = (oldest + window_millis).saturating_sub(now_millis);
            WindowOutcome {
                allowed: false,
                remaining: 0,
                reset_at_millis: oldest + window_millis,
                retry_after_millis: retry_after,
            }
        }
    }
}
