//! Side-table of limits attached to endpoints and groups.
//!
//! Routes are registered once at startup; requests then look their limits up
//! by endpoint name. Nothing is stored on handler objects themselves.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::rate_limit::{KeyFunction, RateLimit, SkipFunction};

/// What to attach: either one `(count, period)` pair or an explicit list.
///
/// ```
/// use std::time::Duration;
/// use routelimit::registry::LimitSpec;
///
/// let spec = LimitSpec::new().count(10).period(Duration::from_secs(10));
/// assert_eq!(spec.build().unwrap().len(), 1);
///
/// let err = LimitSpec::new().build().unwrap_err();
/// assert_eq!(err.to_string(), "no rate limit(s) set");
/// ```
#[derive(Default, Clone)]
pub struct LimitSpec {
    count: Option<u32>,
    period: Option<Duration>,
    key_function: Option<KeyFunction>,
    skip_function: Option<SkipFunction>,
    limits: Option<Vec<RateLimit>>,
}

impl LimitSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a single `(count, period)` pair.
    pub fn single(count: u32, period: Duration) -> Self {
        Self::new().count(count).period(period)
    }

    /// Shorthand for an explicit list.
    pub fn list(limits: Vec<RateLimit>) -> Self {
        Self::new().limits(limits)
    }

    pub fn count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    pub fn period(mut self, period: Duration) -> Self {
        self.period = Some(period);
        self
    }

    /// Key function for the single pair form.
    pub fn key_function(mut self, f: KeyFunction) -> Self {
        self.key_function = Some(f);
        self
    }

    /// Skip function for the single pair form.
    pub fn skip_function(mut self, f: SkipFunction) -> Self {
        self.skip_function = Some(f);
        self
    }

    pub fn limits(mut self, limits: Vec<RateLimit>) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Validate and produce the limits to attach.
    ///
    /// An explicit empty list is accepted and attaches nothing.
    pub fn build(self) -> Result<Vec<RateLimit>, ConfigError> {
        let pair_given = self.count.is_some() || self.period.is_some();
        match (pair_given, self.limits) {
            (true, Some(_)) => Err(ConfigError::ConflictingLimits),
            (false, None) => Err(ConfigError::MissingLimits),
            (false, Some(limits)) => Ok(limits),
            (true, None) => {
                let (Some(count), Some(period)) = (self.count, self.period) else {
                    return Err(ConfigError::IncompletePair);
                };
                let mut limit = RateLimit::new(count, period)?;
                if let Some(f) = self.key_function {
                    limit = limit.with_key_function(f);
                }
                if let Some(f) = self.skip_function {
                    limit = limit.with_skip_function(f);
                }
                Ok(vec![limit])
            }
        }
    }
}

impl From<RateLimit> for LimitSpec {
    fn from(limit: RateLimit) -> Self {
        Self::list(vec![limit])
    }
}

impl From<Vec<RateLimit>> for LimitSpec {
    fn from(limits: Vec<RateLimit>) -> Self {
        Self::list(limits)
    }
}

#[derive(Debug, Default)]
struct Tables {
    endpoints: HashMap<String, Vec<RateLimit>>,
    groups: HashMap<String, Vec<RateLimit>>,
    exempt: HashSet<String>,
}

/// Endpoint and group limits plus exemptions. Clones share the same table.
#[derive(Debug, Default, Clone)]
pub struct LimitRegistry {
    inner: Arc<RwLock<Tables>>,
}

impl LimitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach limits to an endpoint. Repeated calls append in call order.
    pub fn attach(&self, endpoint: impl Into<String>, spec: impl Into<LimitSpec>) -> Result<(), ConfigError> {
        let endpoint = endpoint.into();
        let limits = spec.into().build()?;
        let mut tables = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if tables.exempt.contains(&endpoint) {
            warn!(target: "routelimit::registry", endpoint = %endpoint, "limits attached to exempt endpoint are ignored");
        }
        debug!(target: "routelimit::registry", endpoint = %endpoint, added = limits.len(), "limits attached");
        tables.endpoints.entry(endpoint).or_default().extend(limits);
        Ok(())
    }

    /// Attach limits to every endpoint in `group`.
    pub fn attach_group(&self, group: impl Into<String>, spec: impl Into<LimitSpec>) -> Result<(), ConfigError> {
        let group = group.into();
        let limits = spec.into().build()?;
        debug!(target: "routelimit::registry", group = %group, added = limits.len(), "group limits attached");
        let mut tables = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        tables.groups.entry(group).or_default().extend(limits);
        Ok(())
    }

    /// Exempt an endpoint from every limit, defaults included.
    pub fn exempt(&self, endpoint: impl Into<String>) {
        let endpoint = endpoint.into();
        debug!(target: "routelimit::registry", endpoint = %endpoint, "endpoint exempted");
        let mut tables = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if tables.endpoints.contains_key(&endpoint) {
            warn!(target: "routelimit::registry", endpoint = %endpoint, "limits attached to exempt endpoint are ignored");
        }
        tables.exempt.insert(endpoint);
    }

    pub fn is_exempt(&self, endpoint: &str) -> bool {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).exempt.contains(endpoint)
    }

    /// Effective limits for a request, before skip filtering.
    ///
    /// Order: endpoint limits, then group limits, then `defaults`. Empty for
    /// exempt endpoints.
    pub fn resolve(&self, endpoint: &str, group: Option<&str>, defaults: &[RateLimit]) -> Vec<RateLimit> {
        let tables = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        if tables.exempt.contains(endpoint) {
            return Vec::new();
        }
        let own = tables.endpoints.get(endpoint).map(Vec::as_slice).unwrap_or_default();
        let grouped = group.and_then(|g| tables.groups.get(g)).map(Vec::as_slice).unwrap_or_default();
        own.iter().chain(grouped).chain(defaults).cloned().collect()
    }
}
