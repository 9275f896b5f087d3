//! Error types for rate limiting
use std::fmt;
use std::time::Duration;

/// Boxed error used by store backends to report opaque I/O failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while attaching or constructing limits.
///
/// These are surfaced at route-registration or startup time and never while
/// serving a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Both a single `(count, period)` pair and an explicit limit list were given.
    #[error("use either a count & period pair or an explicit list of limits, not both")]
    ConflictingLimits,
    /// Neither a pair nor a list was given.
    #[error("no rate limit(s) set")]
    MissingLimits,
    /// Only one half of a `(count, period)` pair was given.
    #[error("a rate limit needs both a count and a period")]
    IncompletePair,
    /// Count must be > 0.
    #[error("rate limit count must be > 0")]
    ZeroCount,
    /// Period must be > 0.
    #[error("rate limit period must be > 0 (got {0:?})")]
    ZeroPeriod(Duration),
    /// The period is too short to give each of `count` cells its own
    /// whole-nanosecond emission interval.
    #[error("rate limit period {period:?} is too short for {count} requests")]
    PeriodTooShort {
        /// Requested count.
        count: u32,
        /// Requested period.
        period: Duration,
    },
    /// The period exceeds [`MAX_PERIOD`](crate::rate_limit::MAX_PERIOD).
    #[error("rate limit period must be at most {max:?} (got {0:?})", max = crate::rate_limit::MAX_PERIOD)]
    PeriodTooLong(Duration),
    /// A message limiter was built without any positive time unit.
    #[error("at least one of seconds, minutes, or hours must be provided and positive")]
    InvalidMessagePeriod,
    /// Settings could not be parsed or hold an out-of-range value.
    #[error("invalid rate limiter settings: {0}")]
    InvalidSettings(String),
}

/// Failures reported by a [`TatStore`](crate::rate_limit::store::TatStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend failed (network, protocol, ...).
    #[error("store backend failure: {0}")]
    Backend(#[source] BoxError),
    /// A networked store was used before `open` or after `close`.
    #[error("store is not open")]
    NotOpen,
    /// A stored value could not be read back as a timestamp.
    #[error("stored value for key '{key}' is not a timestamp: {value}")]
    Corrupt {
        /// Store key holding the bad value.
        key: String,
        /// Raw value as read from the backend.
        value: String,
    },
    /// The stored TAT is so far in the future that advancing it overflows.
    #[error("stored TAT for key '{key}' cannot be advanced")]
    TatOverflow {
        /// Store key holding the TAT.
        key: String,
    },
}

impl StoreError {
    /// Wrap any backend error.
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Backend(Box::new(err))
    }
}

/// A request was rejected by one of its limits.
///
/// This is routine control flow: the caller may retry after `retry_after`
/// seconds. It maps to HTTP 429 with a `Retry-After` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rate limit exceeded, retry after {retry_after}s")]
pub struct RateLimitExceeded {
    /// Whole seconds until the rejecting limit admits again; always >= 1.
    pub retry_after: u64,
}

impl RateLimitExceeded {
    /// Build a rejection, clamping `retry_after` to at least one second.
    pub fn new(retry_after: u64) -> Self {
        Self { retry_after: retry_after.max(1) }
    }
}

/// Error returned by the limiter's pre-request phase.
#[derive(Debug, thiserror::Error)]
pub enum LimiterError {
    /// One of the effective limits rejected the request.
    #[error(transparent)]
    Exceeded(#[from] RateLimitExceeded),
    /// The store failed; the core does not retry.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LimiterError {
    /// Check if this error is a rate-limit rejection.
    pub fn is_exceeded(&self) -> bool {
        matches!(self, Self::Exceeded(_))
    }

    /// Check if this error came from the store.
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Seconds to wait before retrying, if this is a rejection.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::Exceeded(e) => Some(e.retry_after),
            Self::Store(_) => None,
        }
    }
}

/// Error type of [`RateLimitService`](crate::rate_limit::RateLimitService).
///
/// Rejections are not errors at this layer (they become 429 responses), so
/// only store failures and inner-service failures appear here.
#[derive(Debug)]
pub enum MiddlewareError<E> {
    /// The TAT store failed during the pre- or post-phase.
    Store(StoreError),
    /// The wrapped service failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for MiddlewareError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "rate limiter store failed: {}", e),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for MiddlewareError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Inner(e) => Some(e),
        }
    }
}

impl<E> MiddlewareError<E> {
    /// Check if this error came from the store.
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Check if this error wraps an inner error.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Store(_) => None,
        }
    }
}
