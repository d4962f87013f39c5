//! Engine configuration: defaults, environment overrides, validation.

use crate::error::ScopeError;
use crate::types::DEFAULT_LOCALE;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default upstream origin; in deployment this points at the proxy boundary.
pub const DEFAULT_BASE_URL: &str = "https://www.snapchat.com";

/// CDN URL shapes probed when reconstructing a media URL from a content id.
pub const DEFAULT_CDN_TEMPLATES: &[&str] = &[
    "https://cf-st.sc-cdn.net/d/{id}.mp4",
    "https://bolt-gcdn.sc-cdn.net/3/{id}.mp4",
    "https://cf-st.sc-cdn.net/aps/bolt/{id}.mp4",
];

/// All tunables of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// Origin every relative resource path is joined onto.
    pub base_url: String,
    pub request_timeout_ms: u64,
    /// Extra attempts for transient failures (0 disables retrying).
    pub retries: u32,
    pub retry_backoff_ms: u64,
    /// Consecutive timeouts before the fetcher reports degraded service.
    pub degraded_after: u32,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
    pub locale: String,
    /// Pause between background category probes.
    pub validation_pause_ms: u64,
    /// How long a tab request waits for its category to be confirmed.
    pub validation_deadline_ms: u64,
    pub cdn_templates: Vec<String>,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_ms: 10_000,
            retries: 1,
            retry_backoff_ms: 500,
            degraded_after: 3,
            cache_ttl_secs: 300,
            cache_capacity: 256,
            locale: DEFAULT_LOCALE.to_string(),
            validation_pause_ms: 250,
            validation_deadline_ms: 3_000,
            cdn_templates: DEFAULT_CDN_TEMPLATES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ScopeConfig {
    /// Defaults overridden by `PROFILESCOPE_*` environment variables.
    /// Unparsable numeric values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env(|key| std::env::var(key).ok());
        cfg
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("PROFILESCOPE_BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = lookup("PROFILESCOPE_LOCALE") {
            self.locale = v;
        }
        if let Some(v) = parse_env(&lookup, "PROFILESCOPE_TIMEOUT_MS") {
            self.request_timeout_ms = v;
        }
        if let Some(v) = parse_env(&lookup, "PROFILESCOPE_CACHE_TTL_SECS") {
            self.cache_ttl_secs = v;
        }
        if let Some(v) = parse_env(&lookup, "PROFILESCOPE_RETRIES") {
            self.retries = v;
        }
        if let Some(v) = parse_env(&lookup, "PROFILESCOPE_VALIDATION_DEADLINE_MS") {
            self.validation_deadline_ms = v;
        }
    }

    pub fn validate(&self) -> Result<(), ScopeError> {
        let parsed = url::Url::parse(&self.base_url)
            .map_err(|e| ScopeError::InvalidUrl(format!("{}: {e}", self.base_url)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ScopeError::InvalidUrl(format!(
                "{}: base URL must be http or https",
                self.base_url
            )));
        }
        if self.request_timeout_ms == 0 {
            return Err(ScopeError::Config(
                "request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn validation_pause(&self) -> Duration {
        Duration::from_millis(self.validation_pause_ms)
    }

    pub fn validation_deadline(&self) -> Duration {
        Duration::from_millis(self.validation_deadline_ms)
    }
}

fn parse_env<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring {key}={raw:?}: not a number");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let cfg = ScopeConfig::default();
        assert_eq!(cfg.cache_ttl(), Duration::from_secs(300));
        assert_eq!(cfg.locale, "en-US");
        assert_eq!(cfg.retries, 1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PROFILESCOPE_BASE_URL", "http://127.0.0.1:8080"),
            ("PROFILESCOPE_CACHE_TTL_SECS", "60"),
            ("PROFILESCOPE_TIMEOUT_MS", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let mut cfg = ScopeConfig::default();
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.base_url, "http://127.0.0.1:8080");
        assert_eq!(cfg.cache_ttl_secs, 60);
        assert_eq!(cfg.request_timeout_ms, 10_000);
        assert_eq!(cfg.validation_deadline(), Duration::from_secs(3));
    }

    #[test]
    fn test_validate_rejects_bad_base() {
        let cfg = ScopeConfig {
            base_url: "ftp://example.com".into(),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = ScopeConfig {
            base_url: "not a url".into(),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ScopeError::InvalidUrl(_))));
    }

    #[test]
    fn test_zero_timeout_is_a_config_error() {
        let cfg = ScopeConfig {
            request_timeout_ms: 0,
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ScopeError::Config(_)));
        assert!(err.to_string().contains("request_timeout_ms"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: ScopeConfig = serde_json::from_str(r#"{"cache_ttl_secs": 30}"#).unwrap();
        assert_eq!(cfg.cache_ttl_secs, 30);
        assert_eq!(cfg.retries, 1);
    }
}
