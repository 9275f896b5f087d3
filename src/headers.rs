//! HTTP header contract for rate-limited responses.
//!
//! Successful rate-limited responses carry all three `RateLimit-*` headers
//! together. Rejections are 429 with a positive `Retry-After`.

use http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use http::{Response, StatusCode};

use crate::error::RateLimitExceeded;

pub const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
pub const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
pub const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

/// Metrics of the tightest limit on a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitHeaders {
    /// `count` of the reported limit.
    pub limit: u32,
    /// Requests that would still be admitted right now.
    pub remaining: u64,
    /// Whole seconds until the bucket is empty again.
    pub reset: u64,
}

impl RateLimitHeaders {
    /// Write all three headers, replacing existing values.
    pub fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(RATELIMIT_RESET, HeaderValue::from(self.reset));
    }

    /// Read the three headers back; `None` unless all are present and numeric.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        fn parse<T: std::str::FromStr>(headers: &HeaderMap, name: &HeaderName) -> Option<T> {
            headers.get(name)?.to_str().ok()?.parse().ok()
        }
        Some(Self {
            limit: parse(headers, &RATELIMIT_LIMIT)?,
            remaining: parse(headers, &RATELIMIT_REMAINING)?,
            reset: parse(headers, &RATELIMIT_RESET)?,
        })
    }
}

impl RateLimitExceeded {
    /// Build the 429 response for this rejection with an empty body.
    pub fn into_response<R: Default>(self) -> Response<R> {
        let mut response = Response::new(R::default());
        *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
        response.headers_mut().insert(RETRY_AFTER, HeaderValue::from(self.retry_after));
        response
    }
}

/// Parse a `Retry-After` header given in delta-seconds.
pub fn retry_after(headers: &HeaderMap) -> Option<u64> {
    headers.get(RETRY_AFTER)?.to_str().ok()?.parse().ok()
}
