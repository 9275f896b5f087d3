#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # routelimit
//!
//! Per-route rate limiting for async Rust web services, built on the
//! Generic Cell Rate Algorithm (GCRA).
//!
//! ## Features
//!
//! - **GCRA** admission with burst tolerance and exact sub-second state
//! - **Per-route limits**: endpoint, group and process-wide defaults, with exemptions
//! - **All-or-nothing admission**: a request consumes every limit or none
//! - **Pluggable stores**: in-memory here, Redis/Valkey in `routelimit-redis`
//! - **Tower middleware** over `http` with `RateLimit-*` and `Retry-After` headers
//! - **Message limiting** for long-lived connections
//!
//! ## Quick Start
//!
//! ```rust
//! use routelimit::{Endpoint, LimitSpec, RateLimitLayer, RateLimiter};
//! use std::convert::Infallible;
//! use std::time::Duration;
//! use tower::{service_fn, Layer, ServiceExt};
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = RateLimiter::builder().build();
//!     limiter
//!         .registry()
//!         .attach("index", LimitSpec::single(10, Duration::from_secs(10)))
//!         .unwrap();
//!
//!     let svc = RateLimitLayer::new(limiter).layer(service_fn(|_req: http::Request<()>| async {
//!         Ok::<_, Infallible>(http::Response::new(String::new()))
//!     }));
//!
//!     let mut req = http::Request::new(());
//!     req.extensions_mut().insert(Endpoint::new("index"));
//!     let resp = svc.oneshot(req).await.unwrap();
//!     assert_eq!(resp.headers()["ratelimit-limit"], "10");
//! }
//! ```

pub mod adaptive;
pub mod clock;
#[cfg(feature = "config")]
pub mod config;
pub mod error;
pub mod headers;
pub mod key;
pub mod limiter;
pub mod message;
pub mod prelude;
pub mod rate_limit;
pub mod registry;
pub mod request;
pub mod telemetry;

// Re-exports
pub use adaptive::DynamicConfig;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ConfigError, LimiterError, MiddlewareError, RateLimitExceeded, StoreError};
pub use headers::RateLimitHeaders;
pub use limiter::{RateLimiter, RateLimiterBuilder};
pub use message::{MessageLimiter, MessageLimiterBuilder};
pub use rate_limit::store::{MemoryStore, TatStore};
pub use rate_limit::{key_function, skip_function, KeyFunction, RateLimit, RateLimitLayer, RateLimitService, SkipFunction};
pub use registry::{LimitRegistry, LimitSpec};
pub use request::{Endpoint, RemoteAddr, RequestInfo};
