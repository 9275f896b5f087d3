//! Two-phase request orchestration.
//!
//! [`RateLimiter::before_request`] resolves a request's effective limits,
//! checks each in order and commits all of them only if none rejects.
//! [`RateLimiter::after_request`] reads back the tightest limit to annotate
//! the response. Both are no-ops while the limiter is disabled or when the
//! request has no endpoint.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, trace};

use crate::adaptive::DynamicConfig;
use crate::clock::{Clock, SystemClock};
use crate::error::{LimiterError, RateLimitExceeded, StoreError};
use crate::headers::RateLimitHeaders;
use crate::key;
use crate::message::MessageLimiterBuilder;
use crate::rate_limit::gcra;
use crate::rate_limit::store::{MemoryStore, TatStore};
use crate::rate_limit::{Decision, KeyFunction, RateLimit, SkipFunction};
use crate::registry::LimitRegistry;
use crate::request::{remote_addr_key, RequestInfo};
use crate::telemetry::{self, Emitter, LimiterEvent, TelemetrySink};

/// Application identity used in store keys when none is configured.
pub const DEFAULT_APP_IDENTITY: &str = "app";

/// Per-route GCRA rate limiter.
///
/// Build one per application and share it (it is usually wrapped in an
/// `Arc` by [`RateLimitLayer`](crate::RateLimitLayer)).
pub struct RateLimiter {
    store: Arc<dyn TatStore>,
    registry: LimitRegistry,
    default_limits: Vec<RateLimit>,
    key_function: KeyFunction,
    skip_function: Option<SkipFunction>,
    enabled: DynamicConfig<bool>,
    app_identity: String,
    clock: Arc<dyn Clock>,
    telemetry: Emitter,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("store", &self.store)
            .field("registry", &self.registry)
            .field("default_limits", &self.default_limits)
            .field("skip_function", &self.skip_function.is_some())
            .field("enabled", &self.enabled.is_set())
            .field("app_identity", &self.app_identity)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RateLimiter {
    pub fn builder() -> RateLimiterBuilder {
        RateLimiterBuilder::default()
    }

    /// Open the store. Call once when the server starts accepting requests.
    pub async fn open(&self) -> Result<(), StoreError> {
        self.store.open().await?;
        info!(target: "routelimit::limiter", store = ?self.store, "rate limiter store opened");
        Ok(())
    }

    /// Close the store. Call once after the server stops.
    pub async fn close(&self) -> Result<(), StoreError> {
        self.store.close().await?;
        info!(target: "routelimit::limiter", "rate limiter store closed");
        Ok(())
    }

    pub fn registry(&self) -> &LimitRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn TatStore> {
        &self.store
    }

    pub fn default_limits(&self) -> &[RateLimit] {
        &self.default_limits
    }

    pub fn app_identity(&self) -> &str {
        &self.app_identity
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.is_set()
    }

    /// Turn limiting on or off for every endpoint at once.
    pub fn set_enabled(&self, enabled: bool) {
        info!(target: "routelimit::limiter", enabled, "rate limiting toggled");
        self.enabled.set(enabled);
    }

    /// Shared handle to the enable flag, for wiring into a config reloader.
    pub fn enabled_handle(&self) -> DynamicConfig<bool> {
        self.enabled.clone()
    }

    /// Start a message limiter that shares this limiter's store, key
    /// function, clock and telemetry.
    pub fn message_limiter(&self, times: u32) -> MessageLimiterBuilder {
        MessageLimiterBuilder::new(times)
            .shared_store(self.store.clone())
            .key_function(self.key_function.clone())
            .app_identity(self.app_identity.clone())
            .shared_clock(self.clock.clone())
            .emitter(self.telemetry.clone())
    }

    /// Pre-phase: reject the request or consume one cell of every limit.
    ///
    /// Limits are checked in resolution order and the first rejection is
    /// returned without touching the store. Commits happen only after every
    /// limit passed, all at the same instant.
    pub async fn before_request(&self, request: &Arc<RequestInfo>) -> Result<(), LimiterError> {
        if !self.is_enabled() {
            return Ok(());
        }
        let Some(endpoint) = request.endpoint.as_deref() else {
            return Ok(());
        };

        let limits = self.active_limits(endpoint, request).await;
        if limits.is_empty() {
            return Ok(());
        }

        let now = self.clock.now();
        let mut keyed = Vec::with_capacity(limits.len());
        for limit in &limits {
            let key = self.key_for(endpoint, limit, request).await;
            if let Decision::Denied { retry_after } =
                gcra::admit_check(self.store.as_ref(), &key, limit, now).await?
            {
                debug!(
                    target: "routelimit::limiter",
                    endpoint,
                    limit = %limit,
                    retry_after,
                    "request rejected"
                );
                self.emit(LimiterEvent::Rejected {
                    endpoint: endpoint.to_string(),
                    limit: limit.to_string(),
                    retry_after,
                })
                .await;
                return Err(RateLimitExceeded::new(retry_after).into());
            }
            keyed.push((limit, key));
        }

        for (limit, key) in &keyed {
            gcra::commit(self.store.as_ref(), key, limit, now).await?;
        }
        trace!(target: "routelimit::limiter", endpoint, limits = keyed.len(), "request admitted");
        self.emit(LimiterEvent::Admitted { endpoint: endpoint.to_string(), limits: keyed.len() }).await;
        Ok(())
    }

    /// Post-phase: metrics of the tightest effective limit.
    ///
    /// The tightest limit is the one with the smallest period; on a tie the
    /// first in resolution order wins. Returns `None` when there is nothing
    /// to report.
    pub async fn after_request(
        &self,
        request: &Arc<RequestInfo>,
    ) -> Result<Option<RateLimitHeaders>, StoreError> {
        if !self.is_enabled() {
            return Ok(None);
        }
        let Some(endpoint) = request.endpoint.as_deref() else {
            return Ok(None);
        };
        let limits = self.registry.resolve(endpoint, request.group.as_deref(), &self.default_limits);
        let Some(tightest) = limits.iter().min_by_key(|limit| limit.period()) else {
            return Ok(None);
        };
        let key = self.key_for(endpoint, tightest, request).await;
        let now = self.clock.now();
        gcra::metrics(self.store.as_ref(), &key, tightest, now).await.map(Some)
    }

    /// Resolved limits minus those skipped for this request.
    async fn active_limits(&self, endpoint: &str, request: &Arc<RequestInfo>) -> Vec<RateLimit> {
        let resolved = self.registry.resolve(endpoint, request.group.as_deref(), &self.default_limits);
        let mut active = Vec::with_capacity(resolved.len());
        for limit in resolved {
            let skip = limit.skip_function().or(self.skip_function.as_ref());
            let skipped = match skip {
                Some(f) => f(request.clone()).await,
                None => false,
            };
            if skipped {
                trace!(target: "routelimit::limiter", endpoint, limit = %limit, "limit skipped");
                self.emit(LimiterEvent::Skipped { endpoint: endpoint.to_string(), limit: limit.to_string() })
                    .await;
            } else {
                active.push(limit);
            }
        }
        active
    }

    async fn key_for(&self, endpoint: &str, limit: &RateLimit, request: &Arc<RequestInfo>) -> String {
        let key_function = limit.key_function().unwrap_or(&self.key_function);
        let caller = key_function(request.clone()).await;
        key::derive(&self.app_identity, endpoint, &limit.identity(), &caller)
    }

    async fn emit(&self, event: LimiterEvent) {
        (self.telemetry)(event).await;
    }
}

/// Builder for [`RateLimiter`].
pub struct RateLimiterBuilder {
    key_function: Option<KeyFunction>,
    skip_function: Option<SkipFunction>,
    store: Option<Arc<dyn TatStore>>,
    default_limits: Vec<RateLimit>,
    enabled: bool,
    app_identity: String,
    clock: Option<Arc<dyn Clock>>,
    telemetry: Option<Emitter>,
    registry: Option<LimitRegistry>,
}

impl Default for RateLimiterBuilder {
    fn default() -> Self {
        Self {
            key_function: None,
            skip_function: None,
            store: None,
            default_limits: Vec::new(),
            enabled: true,
            app_identity: DEFAULT_APP_IDENTITY.to_string(),
            clock: None,
            telemetry: None,
            registry: None,
        }
    }
}

impl RateLimiterBuilder {
    /// Caller identity for limits without their own key function.
    /// Defaults to the client address.
    pub fn key_function(mut self, f: KeyFunction) -> Self {
        self.key_function = Some(f);
        self
    }

    /// Skip predicate for limits without their own skip function.
    pub fn skip_function(mut self, f: SkipFunction) -> Self {
        self.skip_function = Some(f);
        self
    }

    /// TAT store. Defaults to a fresh [`MemoryStore`].
    pub fn store<S: TatStore + 'static>(self, store: S) -> Self {
        self.shared_store(Arc::new(store))
    }

    pub fn shared_store(mut self, store: Arc<dyn TatStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Limits applied to every non-exempt endpoint after its own and its
    /// group's. Replaces any previously configured defaults.
    pub fn default_limits(mut self, limits: Vec<RateLimit>) -> Self {
        self.default_limits = limits;
        self
    }

    /// Append one default limit.
    pub fn default_limit(mut self, limit: RateLimit) -> Self {
        self.default_limits.push(limit);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Application name, the first component of every store key.
    pub fn app_identity(mut self, app: impl Into<String>) -> Self {
        self.app_identity = app.into();
        self
    }

    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn telemetry<S>(mut self, sink: S) -> Self
    where
        S: TelemetrySink + Sync,
        S::Future: Send + 'static,
    {
        self.telemetry = Some(telemetry::emitter(sink));
        self
    }

    /// Use an existing registry, e.g. one filled in while building routes.
    pub fn registry(mut self, registry: LimitRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> RateLimiter {
        RateLimiter {
            store: self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
            registry: self.registry.unwrap_or_default(),
            default_limits: self.default_limits,
            key_function: self.key_function.unwrap_or_else(remote_addr_key),
            skip_function: self.skip_function,
            enabled: DynamicConfig::new(self.enabled),
            app_identity: self.app_identity,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            telemetry: self.telemetry.unwrap_or_else(telemetry::null_emitter),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::rate_limit::skip_function;
    use crate::registry::LimitSpec;
    use crate::telemetry::MemorySink;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn request(endpoint: &str) -> Arc<RequestInfo> {
        Arc::new(RequestInfo::for_endpoint(endpoint).with_remote_addr(IpAddr::V4(Ipv4Addr::LOCALHOST)))
    }

    #[tokio::test]
    async fn single_limit_scenario() {
        let limiter = RateLimiter::builder().clock(ManualClock::default()).build();
        limiter.registry().attach("index", LimitSpec::single(1, secs(2))).unwrap();
        let req = request("index");

        limiter.before_request(&req).await.unwrap();
        let metrics = limiter.after_request(&req).await.unwrap().unwrap();
        assert_eq!(metrics, RateLimitHeaders { limit: 1, remaining: 0, reset: 2 });

        let err = limiter.before_request(&req).await.unwrap_err();
        assert_eq!(err.retry_after(), Some(2));
    }

    #[tokio::test]
    async fn later_limit_rejection_commits_nothing() {
        let store = MemoryStore::new();
        let clock = ManualClock::default();
        let limiter = RateLimiter::builder().store(store.clone()).clock(clock.clone()).build();
        let loose = RateLimit::new(10, secs(20)).unwrap();
        let tight = RateLimit::new(1, secs(60)).unwrap();
        limiter.registry().attach("index", LimitSpec::list(vec![loose.clone(), tight])).unwrap();

        limiter.before_request(&request("index")).await.unwrap();
        assert_eq!(store.len(), 2);
        let loose_key = key::derive(DEFAULT_APP_IDENTITY, "index", &loose.identity(), "127.0.0.1");
        let before = store.get(&loose_key, clock.now()).await.unwrap();

        let err = limiter.before_request(&request("index")).await.unwrap_err();
        assert_eq!(err.retry_after(), Some(60));
        assert_eq!(store.get(&loose_key, clock.now()).await.unwrap(), before);
    }

    #[tokio::test]
    async fn disabled_limiter_is_pass_through() {
        let limiter = RateLimiter::builder().enabled(false).build();
        limiter.registry().attach("index", LimitSpec::single(1, secs(60))).unwrap();
        let req = request("index");
        for _ in 0..3 {
            limiter.before_request(&req).await.unwrap();
        }
        assert_eq!(limiter.after_request(&req).await.unwrap(), None);

        limiter.set_enabled(true);
        limiter.before_request(&req).await.unwrap();
        assert!(limiter.before_request(&req).await.is_err());
    }

    #[tokio::test]
    async fn request_without_endpoint_is_ignored() {
        let limiter = RateLimiter::builder().default_limit(RateLimit::new(1, secs(60)).unwrap()).build();
        let req = Arc::new(RequestInfo::default());
        limiter.before_request(&req).await.unwrap();
        limiter.before_request(&req).await.unwrap();
        assert_eq!(limiter.after_request(&req).await.unwrap(), None);
    }

    #[tokio::test]
    async fn global_skip_applies_only_without_limit_skip() {
        let limiter = RateLimiter::builder()
            .clock(ManualClock::default())
            .skip_function(skip_function(|_| async { true }))
            .build();
        let never_skip = RateLimit::new(1, secs(60))
            .unwrap()
            .with_skip_function(skip_function(|_| async { false }));
        limiter
            .registry()
            .attach("index", LimitSpec::list(vec![RateLimit::new(1, secs(1)).unwrap(), never_skip]))
            .unwrap();
        let req = request("index");
        limiter.before_request(&req).await.unwrap();
        let err = limiter.before_request(&req).await.unwrap_err();
        assert_eq!(err.retry_after(), Some(60));
    }

    #[tokio::test]
    async fn tightest_period_reported_first_wins_ties() {
        let limiter = RateLimiter::builder().clock(ManualClock::default()).build();
        limiter
            .registry()
            .attach(
                "index",
                LimitSpec::list(vec![
                    RateLimit::new(10, secs(20)).unwrap(),
                    RateLimit::new(5, secs(2)).unwrap(),
                    RateLimit::new(7, secs(2)).unwrap(),
                ]),
            )
            .unwrap();
        let req = request("index");
        limiter.before_request(&req).await.unwrap();
        let metrics = limiter.after_request(&req).await.unwrap().unwrap();
        assert_eq!(metrics.limit, 5);
        assert_eq!(metrics.remaining, 4);
        assert_eq!(metrics.reset, 1);
    }

    #[tokio::test]
    async fn defaults_are_owned_per_instance() {
        let a = RateLimiter::builder().default_limit(RateLimit::new(1, secs(1)).unwrap()).build();
        let b = RateLimiter::builder().build();
        assert_eq!(a.default_limits().len(), 1);
        assert!(b.default_limits().is_empty());
    }

    #[tokio::test]
    async fn emits_admitted_and_rejected_events() {
        let sink = MemorySink::new();
        let limiter = RateLimiter::builder().clock(ManualClock::default()).telemetry(sink.clone()).build();
        limiter.registry().attach("index", LimitSpec::single(1, secs(2))).unwrap();
        let req = request("index");
        limiter.before_request(&req).await.unwrap();
        let _ = limiter.before_request(&req).await;

        assert_eq!(
            sink.events(),
            vec![
                LimiterEvent::Admitted { endpoint: "index".into(), limits: 1 },
                LimiterEvent::Rejected { endpoint: "index".into(), limit: "1/2s".into(), retry_after: 2 },
            ]
        );
    }
}
