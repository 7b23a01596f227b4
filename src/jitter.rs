//! Multiplicative jitter applied to backoff delays (spec.md §3, §4.5 step 7).
//!
//! Unlike the teacher crate's full/equal/decorrelated jitter variants, the
//! rotation control plane uses a single ratio-based scheme: the nominal delay
//! is multiplied by a uniform sample in `[1 - ratio, 1 + ratio]`, then clamped
//! to `[0, max_delay]`.

use crate::error::ConfigurationError;
use rand::Rng;
use std::time::Duration;

const MAX_JITTER_RATIO: f64 = 0.5;

/// Validated jitter ratio in `[0, 0.5]`. `0.0` disables jitter entirely.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JitterRatio(f64);

impl JitterRatio {
    pub fn new(ratio: f64) -> Result<Self, ConfigurationError> {
        if !(0.0..=MAX_JITTER_RATIO).contains(&ratio) || !ratio.is_finite() {
            return Err(ConfigurationError::new(
                "jitter_ratio",
                format!("must be in [0, {MAX_JITTER_RATIO}], got {ratio}"),
            ));
        }
        Ok(Self(ratio))
    }

    pub fn none() -> Self {
        Self(0.0)
    }

    pub fn ratio(&self) -> f64 {
        self.0
    }

    /// Apply jitter to `nominal`, clamped to `[0, max_delay]`.
    pub fn apply(&self, nominal: Duration, max_delay: Duration) -> Duration {
        self.apply_with_rng(nominal, max_delay, &mut rand::thread_rng())
    }

    /// Apply jitter using a caller-supplied RNG, for deterministic tests.
    pub fn apply_with_rng<R: Rng>(
        &self,
        nominal: Duration,
        max_delay: Duration,
        rng: &mut R,
    ) -> Duration {
        if self.0 == 0.0 {
            return nominal.min(max_delay);
        }
        let factor = rng.gen_range((1.0 - self.0)..=(1.0 + self.0));
        let jittered_secs = (nominal.as_secs_f64() * factor).max(0.0);
        Duration::from_secs_f64(jittered_secs).min(max_delay)
    }
}

impl Default for JitterRatio {
    fn default() -> Self {
        Self::none()
    }
}
