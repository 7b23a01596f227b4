//! Error types for the proxy rotation control plane.
//!
//! One closed-set enum per concern, each with a hand-rolled `Display`/`Error`
//! impl rather than a derive macro, so messages stay under our control and
//! never leak a proxy's credentials (only `proxy_id` ever appears).

use crate::dispatcher::DispatchErrorKind;
use std::fmt;
use std::time::Duration;

/// Cap on the number of attempt outcomes retained inside `RetryExhausted` to
/// avoid unbounded growth for pathological `max_attempts` configurations.
pub const MAX_RETAINED_FAILURES: usize = 10;

/// Validation failure raised by a builder or constructor at config time.
///
/// Every component validates its configuration eagerly (construct-time, not
/// first-use) and reports the offending field by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationError {
    pub field: &'static str,
    pub message: String,
}

impl ConfigurationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self { field, message: message.into() }
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid configuration for `{}`: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigurationError {}

/// Pool CRUD errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    NotFound { proxy_id: String },
    AlreadyExists { proxy_id: String },
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { proxy_id } => write!(f, "proxy not found: {proxy_id}"),
            Self::AlreadyExists { proxy_id } => write!(f, "proxy already exists: {proxy_id}"),
        }
    }
}

impl std::error::Error for PoolError {}

/// Outcome of a single dispatch attempt, retained for diagnostics on
/// `RetryExhausted`. Never contains raw headers/body to keep the error type
/// cheap and free of credential leakage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub proxy_id: String,
    pub attempt_no: usize,
    pub kind: DispatchErrorKind,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt {} via {} failed: {:?}", self.attempt_no, self.proxy_id, self.kind)
    }
}

/// Terminal error surfaced across the rotator boundary.
///
/// Dispatcher errors are classified and folded into this type inside the
/// retry executor; breaker and proxy statistics are always updated before an
/// error is either retried or returned here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotatorError {
    /// The pool is empty, or every admissible candidate was excluded by the
    /// active strategy.
    NoProxyAvailable,
    /// The pool is non-empty but every breaker denies admission.
    AllCircuitsOpen,
    /// The rate limiter denied admission for this identity.
    RateLimited { retry_after: Duration },
    /// Attempts were exhausted (max_attempts reached, or the total deadline
    /// would be exceeded by the next backoff).
    RetryExhausted { attempts: usize, failures: Vec<AttemptFailure> },
    /// The total request deadline elapsed while selecting, waiting, or
    /// dispatching.
    DeadlineExceeded,
    /// The caller's cancellation token fired.
    Cancelled,
    /// A non-retryable dispatcher error bubbled up without being retried.
    Dispatch(DispatchErrorKind),
    /// Construction/update-time configuration validation failure.
    Configuration(ConfigurationError),
    /// Pool CRUD failure.
    Pool(PoolError),
}

impl fmt::Display for RotatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoProxyAvailable => write!(f, "no admissible proxy available"),
            Self::AllCircuitsOpen => write!(f, "all circuit breakers are open"),
            Self::RateLimited { retry_after } => {
                write!(f, "rate limited, retry after {retry_after:?}")
            }
            Self::RetryExhausted { attempts, failures } => {
                let last = failures.last().map(|f| f.to_string()).unwrap_or_default();
                write!(
                    f,
                    "retry exhausted after {attempts} attempts ({} recorded failures), last: {last}",
                    failures.len()
                )
            }
            Self::DeadlineExceeded => write!(f, "request deadline exceeded"),
            Self::Cancelled => write!(f, "request cancelled"),
            Self::Dispatch(kind) => write!(f, "dispatch error: {kind:?}"),
            Self::Configuration(e) => write!(f, "{e}"),
            Self::Pool(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RotatorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Configuration(e) => Some(e),
            Self::Pool(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigurationError> for RotatorError {
    fn from(e: ConfigurationError) -> Self {
        Self::Configuration(e)
    }
}

impl From<PoolError> for RotatorError {
    fn from(e: PoolError) -> Self {
        Self::Pool(e)
    }
}

impl RotatorError {
    pub fn is_no_proxy_available(&self) -> bool {
        matches!(self, Self::NoProxyAvailable)
    }

    pub fn is_all_circuits_open(&self) -> bool {
        matches!(self, Self::AllCircuitsOpen)
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
