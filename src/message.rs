//! Rate limiting for messages on long-lived connections.
//!
//! A WebSocket or similar stream is routed once but carries many messages.
//! [`MessageLimiter`] applies one GCRA limit per message, keyed by the
//! caller and an optional per-connection context, independent of any
//! endpoint.
//!
//! ```
//! use routelimit::message::MessageLimiter;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let limiter = MessageLimiter::builder(1).seconds(2).build().unwrap();
//! limiter.check("client-1", None).await.unwrap();
//! let err = limiter.check("client-1", None).await.unwrap_err();
//! assert_eq!(err.retry_after(), Some(2));
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigError, LimiterError, RateLimitExceeded};
use crate::key;
use crate::limiter::DEFAULT_APP_IDENTITY;
use crate::rate_limit::gcra;
use crate::rate_limit::store::{MemoryStore, TatStore};
use crate::rate_limit::{Decision, KeyFunction, RateLimit};
use crate::request::{remote_addr_key, RequestInfo};
use crate::telemetry::{self, Emitter, LimiterEvent, TelemetrySink};

/// Builder for [`MessageLimiter`]; the period is the sum of the given units.
pub struct MessageLimiterBuilder {
    times: u32,
    seconds: u64,
    minutes: u64,
    hours: u64,
    store: Option<Arc<dyn TatStore>>,
    key_function: Option<KeyFunction>,
    app_identity: String,
    clock: Option<Arc<dyn Clock>>,
    telemetry: Option<Emitter>,
}

impl MessageLimiterBuilder {
    /// Allow `times` messages per period.
    pub fn new(times: u32) -> Self {
        Self {
            times,
            seconds: 0,
            minutes: 0,
            hours: 0,
            store: None,
            key_function: None,
            app_identity: DEFAULT_APP_IDENTITY.to_string(),
            clock: None,
            telemetry: None,
        }
    }

    pub fn seconds(mut self, seconds: u64) -> Self {
        self.seconds = seconds;
        self
    }

    pub fn minutes(mut self, minutes: u64) -> Self {
        self.minutes = minutes;
        self
    }

    pub fn hours(mut self, hours: u64) -> Self {
        self.hours = hours;
        self
    }

    /// Store for TATs. Defaults to a private [`MemoryStore`].
    pub fn store<S: TatStore + 'static>(self, store: S) -> Self {
        self.shared_store(Arc::new(store))
    }

    pub fn shared_store(mut self, store: Arc<dyn TatStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Caller identity used by [`MessageLimiter::check_request`].
    /// Defaults to the client address.
    pub fn key_function(mut self, f: KeyFunction) -> Self {
        self.key_function = Some(f);
        self
    }

    pub fn app_identity(mut self, app: impl Into<String>) -> Self {
        self.app_identity = app.into();
        self
    }

    pub fn clock<C: Clock + 'static>(self, clock: C) -> Self {
        self.shared_clock(Arc::new(clock))
    }

    pub(crate) fn shared_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn telemetry<S>(self, sink: S) -> Self
    where
        S: TelemetrySink + Sync,
        S::Future: Send + 'static,
    {
        self.emitter(telemetry::emitter(sink))
    }

    pub(crate) fn emitter(mut self, emitter: Emitter) -> Self {
        self.telemetry = Some(emitter);
        self
    }

    /// Fails with [`ConfigError::InvalidMessagePeriod`] when no time unit
    /// is positive or their sum overflows, and with the [`RateLimit::new`]
    /// errors otherwise.
    pub fn build(self) -> Result<MessageLimiter, ConfigError> {
        let total = self
            .hours
            .checked_mul(3600)
            .and_then(|h| h.checked_add(self.minutes.checked_mul(60)?))
            .and_then(|hm| hm.checked_add(self.seconds))
            .filter(|&total| total > 0)
            .ok_or(ConfigError::InvalidMessagePeriod)?;
        let limit = RateLimit::new(self.times, Duration::from_secs(total))?;
        Ok(MessageLimiter {
            limit,
            store: self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
            key_function: self.key_function.unwrap_or_else(remote_addr_key),
            app_identity: self.app_identity,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            telemetry: self.telemetry.unwrap_or_else(telemetry::null_emitter),
        })
    }
}

/// One GCRA limit applied per message.
pub struct MessageLimiter {
    limit: RateLimit,
    store: Arc<dyn TatStore>,
    key_function: KeyFunction,
    app_identity: String,
    clock: Arc<dyn Clock>,
    telemetry: Emitter,
}

impl fmt::Debug for MessageLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageLimiter")
            .field("limit", &self.limit)
            .field("store", &self.store)
            .field("app_identity", &self.app_identity)
            .finish_non_exhaustive()
    }
}

impl MessageLimiter {
    pub fn builder(times: u32) -> MessageLimiterBuilder {
        MessageLimiterBuilder::new(times)
    }

    pub fn limit(&self) -> &RateLimit {
        &self.limit
    }

    pub fn store(&self) -> &Arc<dyn TatStore> {
        &self.store
    }

    /// Admit or reject one message on the connection opened by `request`,
    /// with the caller derived by the configured key function.
    pub async fn check_request(
        &self,
        request: &Arc<RequestInfo>,
        context_key: Option<&str>,
    ) -> Result<(), LimiterError> {
        let caller = (self.key_function)(request.clone()).await;
        self.check(&caller, context_key).await
    }

    /// Admit or reject one message from `caller`.
    ///
    /// Distinct `context_key`s (for example a room or channel) are limited
    /// independently for the same caller.
    pub async fn check(&self, caller: &str, context_key: Option<&str>) -> Result<(), LimiterError> {
        let key = key::derive_message(&self.app_identity, &self.limit.identity(), caller, context_key);
        let now = self.clock.now();
        match gcra::admit_check(self.store.as_ref(), &key, &self.limit, now).await? {
            Decision::Denied { retry_after } => {
                debug!(target: "routelimit::message", caller, context_key, retry_after, "message rejected");
                (self.telemetry)(LimiterEvent::Message { admitted: false, retry_after: Some(retry_after) }).await;
                Err(RateLimitExceeded::new(retry_after).into())
            }
            Decision::Allowed => {
                gcra::commit(self.store.as_ref(), &key, &self.limit, now).await?;
                (self.telemetry)(LimiterEvent::Message { admitted: true, retry_after: None }).await;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn period_is_sum_of_units() {
        let limiter = MessageLimiter::builder(1).hours(1).minutes(30).seconds(30).build().unwrap();
        assert_eq!(limiter.limit().period(), Duration::from_secs(5430));
    }

    #[test]
    fn requires_a_positive_period() {
        assert_eq!(MessageLimiter::builder(1).build().unwrap_err(), ConfigError::InvalidMessagePeriod);
        assert_eq!(
            MessageLimiter::builder(1).seconds(0).build().unwrap_err(),
            ConfigError::InvalidMessagePeriod
        );
        assert_eq!(MessageLimiter::builder(0).seconds(1).build().unwrap_err(), ConfigError::ZeroCount);
    }

    #[test]
    fn overflowing_period_is_rejected() {
        assert_eq!(
            MessageLimiter::builder(1).hours(u64::MAX).build().unwrap_err(),
            ConfigError::InvalidMessagePeriod
        );
        assert_eq!(
            MessageLimiter::builder(1).seconds(u64::MAX).minutes(1).build().unwrap_err(),
            ConfigError::InvalidMessagePeriod
        );
        // representable, but past the longest accepted period
        assert_eq!(
            MessageLimiter::builder(1).hours(1_000_000).build().unwrap_err(),
            ConfigError::PeriodTooLong(Duration::from_secs(3_600_000_000))
        );
    }

    #[tokio::test]
    async fn allows_times_per_period() {
        let limiter = MessageLimiter::builder(2).minutes(1).build().unwrap();
        limiter.check("c", None).await.unwrap();
        limiter.check("c", None).await.unwrap();
        let err = limiter.check("c", None).await.unwrap_err();
        assert!(err.retry_after().unwrap() > 0);
    }

    #[tokio::test]
    async fn context_keys_are_independent() {
        let limiter = MessageLimiter::builder(1).seconds(2).build().unwrap();
        limiter.check("c", Some("user1")).await.unwrap();
        limiter.check("c", Some("user2")).await.unwrap();
        assert!(limiter.check("c", Some("user1")).await.unwrap_err().is_exceeded());
    }

    #[tokio::test]
    async fn recovers_after_retry_after() {
        let clock = ManualClock::default();
        let limiter = MessageLimiter::builder(1).seconds(2).clock(clock.clone()).build().unwrap();
        limiter.check("c", None).await.unwrap();
        let wait = limiter.check("c", None).await.unwrap_err().retry_after().unwrap();
        clock.advance(Duration::from_secs(wait));
        limiter.check("c", None).await.unwrap();
    }

    #[tokio::test]
    async fn check_request_derives_the_caller() {
        use std::net::{IpAddr, Ipv4Addr};

        let limiter = MessageLimiter::builder(1).seconds(10).build().unwrap();
        let peer = |octet| Arc::new(RequestInfo::default().with_remote_addr(IpAddr::V4(Ipv4Addr::new(10, 0, 0, octet))));
        limiter.check_request(&peer(1), None).await.unwrap();
        limiter.check_request(&peer(2), None).await.unwrap();
        assert!(limiter.check_request(&peer(1), None).await.is_err());
        // same caller string through the plain entry point
        assert!(limiter.check("10.0.0.2", None).await.is_err());
    }

    #[tokio::test]
    async fn custom_key_function_groups_connections() {
        let limiter = MessageLimiter::builder(1)
            .seconds(10)
            .key_function(crate::rate_limit::key_function(|req| async move {
                req.header("x-user").unwrap_or("anonymous").to_string()
            }))
            .build()
            .unwrap();
        let user = |name: &'static str| {
            Arc::new(RequestInfo::default().with_header(
                http::header::HeaderName::from_static("x-user"),
                http::HeaderValue::from_static(name),
            ))
        };
        limiter.check_request(&user("ann"), Some("room")).await.unwrap();
        limiter.check_request(&user("bo"), Some("room")).await.unwrap();
        assert!(limiter.check_request(&user("ann"), Some("room")).await.is_err());
    }

    #[tokio::test]
    async fn explicit_store_is_used() {
        let store = MemoryStore::new();
        let limiter = MessageLimiter::builder(1).seconds(2).store(store.clone()).build().unwrap();
        limiter.check("c", None).await.unwrap();
        assert_eq!(store.len(), 1);
    }
}
