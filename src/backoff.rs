//! Backoff strategies for the retry executor (spec.md §3, §4.5 step 7).

use crate::error::ConfigurationError;
use std::time::Duration;

const MIN_BASE_DELAY: Duration = Duration::from_millis(100);
const MAX_BASE_DELAY: Duration = Duration::from_secs(60);
const MIN_MULTIPLIER: f64 = 1.1;
const MAX_MULTIPLIER: f64 = 10.0;
const MIN_MAX_DELAY: Duration = Duration::from_secs(1);
const MAX_MAX_DELAY: Duration = Duration::from_secs(300);

/// Backoff strategy between retry attempts.
///
/// `attempt` passed to [`Backoff::nominal_delay`] is 0-indexed: the delay
/// computed after the first failed attempt uses `attempt == 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed { base_delay: Duration, max_delay: Duration },
    Linear { base_delay: Duration, max_delay: Duration },
    Exponential { base_delay: Duration, multiplier: f64, max_delay: Duration },
}

impl Backoff {
    pub fn fixed(base_delay: Duration, max_delay: Duration) -> Result<Self, ConfigurationError> {
        validate_base_delay(base_delay)?;
        validate_max_delay(max_delay)?;
        Ok(Self::Fixed { base_delay, max_delay })
    }

    pub fn linear(base_delay: Duration, max_delay: Duration) -> Result<Self, ConfigurationError> {
        validate_base_delay(base_delay)?;
        validate_max_delay(max_delay)?;
        Ok(Self::Linear { base_delay, max_delay })
    }

    pub fn exponential(
        base_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
    ) -> Result<Self, ConfigurationError> {
        validate_base_delay(base_delay)?;
        validate_max_delay(max_delay)?;
        if !(MIN_MULTIPLIER..=MAX_MULTIPLIER).contains(&multiplier) {
            return Err(ConfigurationError::new(
                "multiplier",
                format!("must be in [{MIN_MULTIPLIER}, {MAX_MULTIPLIER}], got {multiplier}"),
            ));
        }
        Ok(Self::Exponential { base_delay, multiplier, max_delay })
    }

    pub fn max_delay(&self) -> Duration {
        match self {
            Self::Fixed { max_delay, .. }
            | Self::Linear { max_delay, .. }
            | Self::Exponential { max_delay, .. } => *max_delay,
        }
    }

    /// Nominal delay before jitter is applied, for the given 0-indexed attempt.
    pub fn nominal_delay(&self, attempt: usize) -> Duration {
        match self {
            Self::Fixed { base_delay, max_delay } => (*base_delay).min(*max_delay),
            Self::Linear { base_delay, max_delay } => {
                let factor = (attempt as u32).saturating_add(1);
                base_delay
                    .checked_mul(factor)
                    .unwrap_or(Duration::from_secs(u64::MAX))
                    .min(*max_delay)
            }
            Self::Exponential { base_delay, multiplier, max_delay } => {
                let scale = multiplier.powi(attempt as i32);
                let nominal_secs = base_delay.as_secs_f64() * scale;
                let nominal = Duration::from_secs_f64(nominal_secs.min(max_delay.as_secs_f64() * 2.0));
                nominal.min(*max_delay)
            }
        }
    }
}

fn validate_base_delay(base_delay: Duration) -> Result<(), ConfigurationError> {
    if !(MIN_BASE_DELAY..=MAX_BASE_DELAY).contains(&base_delay) {
        return Err(ConfigurationError::new(
            "base_delay",
            format!("must be in [{MIN_BASE_DELAY:?}, {MAX_BASE_DELAY:?}], got {base_delay:?}"),
        ));
    }
    Ok(())
}

fn validate_max_delay(max_delay: Duration) -> Result<(), ConfigurationError> {
    if !(MIN_MAX_DELAY..=MAX_MAX_DELAY).contains(&max_delay) {
        return Err(ConfigurationError::new(
            "max_delay",
            format!("must be in [{MIN_MAX_DELAY:?}, {MAX_MAX_DELAY:?}], got {max_delay:?}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_backoff_is_constant() {
        let b = Backoff::fixed(Duration::from_secs(1), Duration::from_secs(10)).unwrap();
        assert_eq!(b.nominal_delay(0), Duration::from_secs(1));
        assert_eq!(b.nominal_delay(5), Duration::from_secs(1));
    }

    #[test]
    fn linear_backoff_scales_with_attempt() {
        let b = Backoff::linear(Duration::from_secs(1), Duration::from_secs(10)).unwrap();
        assert_eq!(b.nominal_delay(0), Duration::from_secs(1));
        assert_eq!(b.nominal_delay(1), Duration::from_secs(2));
        assert_eq!(b.nominal_delay(2), Duration::from_secs(3));
    }

    #[test]
    fn linear_backoff_caps_at_max() {
        let b = Backoff::linear(Duration::from_secs(10), Duration::from_secs(15)).unwrap();
        assert_eq!(b.nominal_delay(5), Duration::from_secs(15));
    }

    #[test]
    fn exponential_backoff_matches_scenario_s2() {
        // S1/S2 scenario: base=1s, mult=2, max=10s -> delays 1s, 2s
        let b = Backoff::exponential(Duration::from_secs(1), 2.0, Duration::from_secs(10)).unwrap();
        assert_eq!(b.nominal_delay(0), Duration::from_secs(1));
        assert_eq!(b.nominal_delay(1), Duration::from_secs(2));
        assert_eq!(b.nominal_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn exponential_backoff_caps_at_max() {
        let b = Backoff::exponential(Duration::from_secs(1), 2.0, Duration::from_secs(5)).unwrap();
        assert_eq!(b.nominal_delay(10), Duration::from_secs(5));
    }

    #[test]
    fn rejects_base_delay_out_of_range() {
        assert!(Backoff::fixed(Duration::from_millis(1), Duration::from_secs(10)).is_err());
        assert!(Backoff::fixed(Duration::from_secs(120), Duration::from_secs(200)).is_err());
    }

    #[test]
    fn rejects_multiplier_out_of_range() {
        assert!(Backoff::exponential(Duration::from_secs(1), 1.0, Duration::from_secs(10))
            .is_err());
        assert!(Backoff::exponential(Duration::from_secs(1), 11.0, Duration::from_secs(10))
            .is_err());
    }

    #[test]
    fn rejects_max_delay_out_of_range() {
        assert!(Backoff::fixed(Duration::from_secs(1), Duration::from_millis(500)).is_err());
        assert!(Backoff::fixed(Duration::from_secs(1), Duration::from_secs(400)).is_err());
    }
}
