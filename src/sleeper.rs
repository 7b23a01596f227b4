//! Abstraction for sleeping/waiting between retry attempts.
//!
//! Enables fast, deterministic tests without real time delays and lets the
//! retry executor honor a caller-supplied cancellation token while asleep.

use async_trait::async_trait;
use std::time::Duration;

/// Abstraction for sleeping/waiting.
#[async_trait]
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper using the tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }
}

/// Deterministic test doubles, gated behind the `test-util` feature.
#[cfg(feature = "test-util")]
pub mod testing {
    use super::Sleeper;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Sleeper that never actually sleeps; used to keep retry/backoff tests instant.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct InstantSleeper;

    #[async_trait]
    impl Sleeper for InstantSleeper {
        async fn sleep(&self, _duration: Duration) {}
    }

    /// Sleeper that records every requested duration instead of waiting.
    #[derive(Debug, Clone, Default)]
    pub struct TrackingSleeper {
        calls: Arc<Mutex<Vec<Duration>>>,
    }

    impl TrackingSleeper {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn calls(&self) -> Vec<Duration> {
            self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
        }

        pub fn clear(&self) {
            self.calls.lock().unwrap_or_else(|p| p.into_inner()).clear();
        }
    }

    #[async_trait]
    impl Sleeper for TrackingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.calls.lock().unwrap_or_else(|p| p.into_inner()).push(duration);
        }
    }
}
