//! Serde-loadable limiter settings.
//!
//! ```
//! use routelimit::config::LimiterSettings;
//! use routelimit::RateLimiter;
//!
//! let settings = LimiterSettings::from_json(r#"{
//!     "app_identity": "shop",
//!     "default_limits": [{ "count": 100, "period_secs": 60 }]
//! }"#).unwrap();
//! let limiter = RateLimiter::builder().settings(&settings).unwrap().build();
//! assert_eq!(limiter.app_identity(), "shop");
//! assert_eq!(limiter.default_limits().len(), 1);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::limiter::RateLimiterBuilder;
use crate::rate_limit::RateLimit;

fn default_enabled() -> bool {
    true
}

/// One `(count, period)` pair as written in a settings file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LimitSettings {
    pub count: u32,
    /// Period in seconds; fractions allowed.
    pub period_secs: f64,
}

impl LimitSettings {
    pub fn to_limit(&self) -> Result<RateLimit, ConfigError> {
        let period = Duration::try_from_secs_f64(self.period_secs).map_err(|_| {
            ConfigError::InvalidSettings(format!("period_secs must be a finite, non-negative number, got {}", self.period_secs))
        })?;
        RateLimit::new(self.count, period)
    }
}

/// Limiter-wide settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LimiterSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub app_identity: Option<String>,
    #[serde(default)]
    pub default_limits: Vec<LimitSettings>,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self { enabled: true, app_identity: None, default_limits: Vec::new() }
    }
}

impl LimiterSettings {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::InvalidSettings(e.to_string()))
    }

    /// Validate every default limit.
    pub fn limits(&self) -> Result<Vec<RateLimit>, ConfigError> {
        self.default_limits.iter().map(LimitSettings::to_limit).collect()
    }
}

impl RateLimiterBuilder {
    /// Apply settings. Default limits from `settings` are appended to any
    /// already configured.
    pub fn settings(mut self, settings: &LimiterSettings) -> Result<Self, ConfigError> {
        for limit in settings.limits()? {
            self = self.default_limit(limit);
        }
        self = self.enabled(settings.enabled);
        if let Some(app) = &settings.app_identity {
            self = self.app_identity(app.clone());
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RateLimiter;

    #[test]
    fn defaults_when_fields_missing() {
        let settings = LimiterSettings::from_json("{}").unwrap();
        assert_eq!(settings, LimiterSettings::default());
        assert!(settings.enabled);
    }

    #[test]
    fn fractional_periods() {
        let settings =
            LimiterSettings::from_json(r#"{"default_limits":[{"count":2,"period_secs":0.5}]}"#).unwrap();
        let limits = settings.limits().unwrap();
        assert_eq!(limits[0].period(), Duration::from_millis(500));
    }

    #[test]
    fn invalid_values_are_config_errors() {
        assert!(matches!(LimiterSettings::from_json("not json"), Err(ConfigError::InvalidSettings(_))));
        let negative =
            LimiterSettings::from_json(r#"{"default_limits":[{"count":1,"period_secs":-1}]}"#).unwrap();
        assert!(matches!(negative.limits(), Err(ConfigError::InvalidSettings(_))));
        let zero = LimiterSettings::from_json(r#"{"default_limits":[{"count":0,"period_secs":1}]}"#).unwrap();
        assert_eq!(zero.limits().unwrap_err(), ConfigError::ZeroCount);
    }

    #[test]
    fn settings_apply_to_builder() {
        let settings = LimiterSettings::from_json(r#"{"enabled":false}"#).unwrap();
        let limiter = RateLimiter::builder().settings(&settings).unwrap().build();
        assert!(!limiter.is_enabled());
        assert_eq!(limiter.app_identity(), crate::limiter::DEFAULT_APP_IDENTITY);
    }
}
