//! Rate limit definitions.
//!
//! This module provides the building blocks the limiter is assembled from:
//! - [`RateLimit`]: an immutable `count` per `period` definition.
//! - [`KeyFunction`] / [`SkipFunction`]: async per-request callbacks.
//! - [`Decision`]: the outcome of checking one limit.
//!
//! # Architecture
//!
//! - **Definition**: `RateLimit` says *what* is allowed and derives the GCRA
//!   emission interval from it.
//! - **Logic**: the [`gcra`] module holds the math: check, commit and the
//!   response metrics.
//! - **Storage**: [`store::TatStore`] persists one theoretical arrival time
//!   per key so the same limit can be enforced across processes.
//! - **Middleware**: [`RateLimitLayer`] wires a [`RateLimiter`](crate::RateLimiter)
//!   into a `tower` stack over `http` requests.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::ConfigError;
use crate::request::RequestInfo;

pub mod gcra;
pub mod middleware;
pub mod store;
pub use middleware::{RateLimitLayer, RateLimitService};

/// Async callback producing a caller identity for a request.
pub type KeyFunction = Arc<dyn Fn(Arc<RequestInfo>) -> BoxFuture<'static, String> + Send + Sync>;

/// Async predicate deciding whether a limit is bypassed for a request.
pub type SkipFunction = Arc<dyn Fn(Arc<RequestInfo>) -> BoxFuture<'static, bool> + Send + Sync>;

/// Wrap an async closure as a [`KeyFunction`].
///
/// ```
/// use routelimit::rate_limit::key_function;
/// let by_api_key = key_function(|req| async move {
///     req.header("x-api-key").unwrap_or("anonymous").to_string()
/// });
/// # let _ = by_api_key;
/// ```
pub fn key_function<F, Fut>(f: F) -> KeyFunction
where
    F: Fn(Arc<RequestInfo>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = String> + Send + 'static,
{
    Arc::new(move |req| f(req).boxed())
}

/// Wrap an async closure as a [`SkipFunction`].
pub fn skip_function<F, Fut>(f: F) -> SkipFunction
where
    F: Fn(Arc<RequestInfo>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    Arc::new(move |req| f(req).boxed())
}

/// Longest accepted period: one hundred 365-day years.
pub const MAX_PERIOD: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A single limit: at most `count` requests per `period`.
///
/// Immutable once built. The optional key/skip functions override the
/// limiter-wide ones for this limit only.
#[derive(Clone)]
pub struct RateLimit {
    count: u32,
    period: Duration,
    key_function: Option<KeyFunction>,
    skip_function: Option<SkipFunction>,
}

impl RateLimit {
    /// Build a limit.
    ///
    /// Rejects a zero count, a zero period, a period above [`MAX_PERIOD`],
    /// and a period shorter than `count` nanoseconds (the emission interval
    /// would truncate to zero and never advance).
    pub fn new(count: u32, period: Duration) -> Result<Self, ConfigError> {
        if count == 0 {
            return Err(ConfigError::ZeroCount);
        }
        if period.is_zero() {
            return Err(ConfigError::ZeroPeriod(period));
        }
        if period > MAX_PERIOD {
            return Err(ConfigError::PeriodTooLong(period));
        }
        if (period / count).is_zero() {
            return Err(ConfigError::PeriodTooShort { count, period });
        }
        Ok(Self { count, period, key_function: None, skip_function: None })
    }

    /// Convenience for whole-second periods.
    pub fn per_seconds(count: u32, secs: u64) -> Result<Self, ConfigError> {
        Self::new(count, Duration::from_secs(secs))
    }

    /// Partition this limit by a custom caller identity.
    pub fn with_key_function(mut self, f: KeyFunction) -> Self {
        self.key_function = Some(f);
        self
    }

    /// Bypass this limit when `f` resolves to true.
    pub fn with_skip_function(mut self, f: SkipFunction) -> Self {
        self.skip_function = Some(f);
        self
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn key_function(&self) -> Option<&KeyFunction> {
        self.key_function.as_ref()
    }

    pub fn skip_function(&self) -> Option<&SkipFunction> {
        self.skip_function.as_ref()
    }

    /// Emission interval: minimum spacing between admissions under sustained load.
    pub fn inverse(&self) -> Duration {
        self.period / self.count
    }

    /// Burst allowance: how far the TAT may run ahead of now and still admit.
    ///
    /// Equal to `period - inverse` whenever `count` divides the period in
    /// nanoseconds. Otherwise `inverse` is truncated and this is
    /// `inverse * (count - 1)`, which keeps the burst at exactly `count`.
    pub fn max_interval(&self) -> Duration {
        self.inverse() * (self.count - 1)
    }

    /// Stable identity of the `(count, period)` pair, used in store keys.
    ///
    /// The period is written as exact decimal seconds (`"1-2.0"`,
    /// `"3-0.5"`, `"1-0.000000001"`), so distinct pairs never share an
    /// identity. Key and skip functions do not take part: two limits with
    /// the same count and period share state for the same endpoint and
    /// caller.
    pub fn identity(&self) -> String {
        let nanos = format!("{:09}", self.period.subsec_nanos());
        let fraction = match nanos.trim_end_matches('0') {
            "" => "0",
            digits => digits,
        };
        format!("{}-{}.{}", self.count, self.period.as_secs(), fraction)
    }
}

impl fmt::Debug for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimit")
            .field("count", &self.count)
            .field("period", &self.period)
            .field("key_function", &self.key_function.is_some())
            .field("skip_function", &self.skip_function.is_some())
            .finish()
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:?}", self.count, self.period)
    }
}

/// Outcome of checking one limit against its stored TAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The limit has room; nothing has been consumed yet.
    Allowed,
    /// The limit is exhausted.
    Denied {
        /// Whole seconds until it admits again, always >= 1.
        retry_after: u64,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}
