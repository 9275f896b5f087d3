//! Generic Cell Rate Algorithm.
//!
//! Each key carries one theoretical arrival time (TAT): the instant its
//! bucket is empty again. Admitting a request pushes the TAT forward by one
//! emission interval (`period / count`); a request is rejected when the TAT
//! is more than [`RateLimit::max_interval`] (`period - inverse`) ahead of now.
//!
//! Checking and committing are separate so a caller can check every limit
//! on a request before consuming any of them. Internal arithmetic is exact
//! `Duration` math; only the reported values are rounded to whole seconds.

use std::time::{Duration, SystemTime};

use crate::error::StoreError;
use crate::headers::RateLimitHeaders;
use crate::rate_limit::store::TatStore;
use crate::rate_limit::{Decision, RateLimit};

/// Round a duration up to whole seconds.
pub fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

fn effective_tat(stored: SystemTime, now: SystemTime) -> SystemTime {
    stored.max(now)
}

fn separation(tat: SystemTime, now: SystemTime) -> Duration {
    tat.duration_since(now).unwrap_or(Duration::ZERO)
}

/// Decide whether `limit` admits a request at `now`, given the stored TAT.
pub fn evaluate(stored: SystemTime, now: SystemTime, limit: &RateLimit) -> Decision {
    let sep = separation(effective_tat(stored, now), now);
    let max_interval = limit.max_interval();
    if sep > max_interval {
        Decision::Denied { retry_after: ceil_secs(sep - max_interval).max(1) }
    } else {
        Decision::Allowed
    }
}

/// TAT after consuming one cell at `now`, or `None` if it is not
/// representable.
pub fn next_tat(stored: SystemTime, now: SystemTime, limit: &RateLimit) -> Option<SystemTime> {
    effective_tat(stored, now).checked_add(limit.inverse())
}

/// Outward metrics for `limit` given its current TAT.
pub fn snapshot(stored: SystemTime, now: SystemTime, limit: &RateLimit) -> RateLimitHeaders {
    let sep = separation(effective_tat(stored, now), now);
    let count = u64::from(limit.count());
    let remaining = match limit.period().checked_sub(sep) {
        Some(left) => left
            .as_nanos()
            .checked_div(limit.inverse().as_nanos())
            .map_or(count, |n| u64::try_from(n).unwrap_or(u64::MAX).min(count)),
        None => 0,
    };
    RateLimitHeaders { limit: limit.count(), remaining, reset: ceil_secs(sep) }
}

/// Check `limit` for `key` without mutating the store.
pub async fn admit_check(
    store: &dyn TatStore,
    key: &str,
    limit: &RateLimit,
    now: SystemTime,
) -> Result<Decision, StoreError> {
    let stored = store.get(key, now).await?;
    Ok(evaluate(stored, now, limit))
}

/// Consume one cell of `limit` for `key`, returning the new TAT.
///
/// Re-reads the TAT rather than trusting the value seen by `admit_check`.
pub async fn commit(
    store: &dyn TatStore,
    key: &str,
    limit: &RateLimit,
    now: SystemTime,
) -> Result<SystemTime, StoreError> {
    let stored = store.get(key, now).await?;
    let tat = next_tat(stored, now, limit).ok_or_else(|| StoreError::TatOverflow { key: key.to_string() })?;
    store.set(key, tat).await?;
    Ok(tat)
}

/// Read the current metrics for `key` under `limit`.
pub async fn metrics(
    store: &dyn TatStore,
    key: &str,
    limit: &RateLimit,
    now: SystemTime,
) -> Result<RateLimitHeaders, StoreError> {
    let stored = store.get(key, now).await?;
    Ok(snapshot(stored, now, limit))
}
