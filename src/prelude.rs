//! Convenient re-exports for common routelimit types.
pub use crate::{
    error::{ConfigError, LimiterError, MiddlewareError, RateLimitExceeded, StoreError},
    headers::RateLimitHeaders,
    limiter::{RateLimiter, RateLimiterBuilder},
    message::MessageLimiter,
    rate_limit::{
        key_function, skip_function,
        store::{MemoryStore, TatStore},
        KeyFunction, RateLimit, RateLimitLayer, SkipFunction,
    },
    registry::{LimitRegistry, LimitSpec},
    request::{Endpoint, RemoteAddr, RequestInfo},
};
