//! Document fetcher: the only component that talks to the network.
//!
//! Relative resource paths are joined onto the configured base URL (the proxy
//! boundary); absolute URLs go out as-is, which is how the resolver reaches
//! CDN hosts. Every request shares one retry policy: transient failures
//! (5xx, 429, timeouts, connection errors) get the configured number of extra
//! attempts with exponential backoff, everything else is returned immediately.

use crate::config::ScopeConfig;
use crate::error::{FailureKind, FetchFailure};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                          AppleWebKit/537.36 (KHTML, like Gecko) \
                          Chrome/131.0.0.0 Safari/537.36";

/// Content types accepted as playable media by existence probes.
const MEDIA_CONTENT_TYPES: &[&str] = &[
    "application/vnd.apple.mpegurl",
    "application/x-mpegurl",
    "application/dash+xml",
];

/// Raw text returned by a successful fetch.
#[derive(Debug, Clone)]
pub struct RawDocument {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

/// Result of a lightweight existence probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 2xx with a video or streaming-manifest content type.
    pub fn is_video(&self) -> bool {
        if !self.is_success() {
            return false;
        }
        let Some(ct) = self.content_type.as_deref() else {
            return false;
        };
        let ct = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        ct.starts_with("video/") || MEDIA_CONTENT_TYPES.contains(&ct.as_str())
    }
}

/// Whether the fetcher is still within its timeout budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceHealth {
    Healthy,
    Degraded { consecutive_timeouts: u32 },
}

/// Anything that can hand the engine documents and probe results.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Fetch a resource path (relative to the upstream base) or absolute URL.
    async fn fetch(&self, resource: &str) -> Result<RawDocument, FetchFailure>;

    /// Check that a URL exists without downloading it.
    async fn probe(&self, url: &str) -> Result<ProbeOutcome, FetchFailure>;

    fn health(&self) -> ServiceHealth {
        ServiceHealth::Healthy
    }
}

/// Retry settings shared by fetches, probes and manifest downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_backoff: Duration) -> Self {
        Self {
            max_retries,
            base_backoff,
        }
    }

    /// Backoff before retry number `attempt` (1-based): base * 2^(attempt-1).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(1u32 << exp)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(1, Duration::from_millis(500))
    }
}

/// reqwest-backed [`DocumentSource`].
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base: Url,
    policy: RetryPolicy,
    timeout: Duration,
    degraded_after: u32,
    consecutive_timeouts: Arc<AtomicU32>,
}

impl HttpFetcher {
    pub fn new(config: &ScopeConfig) -> Result<Self, FetchFailure> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| FetchFailure::invalid_url(format!("{}: {e}", config.base_url)))?;

        let mut headers = reqwest::header::HeaderMap::new();
        if let Ok(lang) = reqwest::header::HeaderValue::from_str(&config.locale) {
            headers.insert(reqwest::header::ACCEPT_LANGUAGE, lang);
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .unwrap_or_default();

        Ok(Self {
            client,
            base,
            policy: RetryPolicy::new(
                config.retries,
                Duration::from_millis(config.retry_backoff_ms),
            ),
            timeout: config.request_timeout(),
            degraded_after: config.degraded_after.max(1),
            consecutive_timeouts: Arc::new(AtomicU32::new(0)),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Resolve a resource path or absolute URL to the URL actually requested.
    pub fn target(&self, resource: &str) -> Result<Url, FetchFailure> {
        let resource = resource.trim();
        if resource.is_empty() {
            return Err(FetchFailure::invalid_url("empty resource path"));
        }
        let parsed = if resource.starts_with("http://") || resource.starts_with("https://") {
            Url::parse(resource)
        } else if let Some(rest) = resource.strip_prefix("//") {
            Url::parse(&format!("{}://{rest}", self.base.scheme()))
        } else {
            self.base.join(resource)
        };
        parsed.map_err(|e| FetchFailure::invalid_url(format!("{resource}: {e}")))
    }

    /// Send a request built by `build`, retrying transient failures.
    ///
    /// Returns the last response received even when its status is an error;
    /// only network-level failures come back as `Err`.
    async fn send_with_retry<F>(&self, url: &Url, build: F) -> Result<reqwest::Response, FetchFailure>
    where
        F: Fn(&reqwest::Client, &Url) -> reqwest::RequestBuilder + Send + Sync,
    {
        let mut attempt = 0u32;
        loop {
            let sent = build(&self.client, url).timeout(self.timeout).send().await;

            let (failure, retry_after) = match sent {
                Ok(resp) => {
                    self.consecutive_timeouts.store(0, Ordering::Relaxed);
                    let status = resp.status().as_u16();
                    let transient = status >= 500 || status == 429;
                    if !transient || attempt >= self.policy.max_retries {
                        return Ok(resp);
                    }
                    let retry_after = resp
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.trim().parse::<u64>().ok())
                        .map(|secs| Duration::from_secs(secs.min(10)));
                    (FetchFailure::status(status, status_text(status)), retry_after)
                }
                Err(e) => {
                    let failure = classify_error(&e);
                    if failure.kind == FailureKind::Timeout {
                        self.consecutive_timeouts.fetch_add(1, Ordering::Relaxed);
                    }
                    if !failure.is_transient() || attempt >= self.policy.max_retries {
                        tracing::warn!("request to {url} failed: {failure}");
                        return Err(failure);
                    }
                    (failure, None)
                }
            };

            attempt += 1;
            let delay = retry_after.unwrap_or_else(|| self.policy.delay(attempt));
            tracing::debug!(
                "retrying {url} in {}ms (attempt {attempt}): {failure}",
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl DocumentSource for HttpFetcher {
    async fn fetch(&self, resource: &str) -> Result<RawDocument, FetchFailure> {
        let url = self.target(resource)?;
        let resp = self.send_with_retry(&url, |c, u| c.get(u.clone())).await?;

        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        if !resp.status().is_success() {
            tracing::warn!("GET {url} returned {status}");
            return Err(FetchFailure::status(status, status_text(status)));
        }
        let content_type = header_string(&resp, reqwest::header::CONTENT_TYPE);
        let body = resp
            .text()
            .await
            .map_err(|e| FetchFailure::network(format!("reading body of {url}: {e}")))?;

        tracing::debug!("GET {url} -> {status} ({} bytes)", body.len());
        Ok(RawDocument {
            url: final_url,
            status,
            content_type,
            body,
        })
    }

    async fn probe(&self, url: &str) -> Result<ProbeOutcome, FetchFailure> {
        let target = self.target(url)?;
        let mut resp = self.send_with_retry(&target, |c, u| c.head(u.clone())).await?;

        // Some CDNs refuse HEAD; a one-byte ranged GET answers the same question.
        if matches!(resp.status().as_u16(), 405 | 501) {
            resp = self
                .send_with_retry(&target, |c, u| {
                    c.get(u.clone()).header(reqwest::header::RANGE, "bytes=0-0")
                })
                .await?;
        }

        let outcome = ProbeOutcome {
            url: target.to_string(),
            status: resp.status().as_u16(),
            content_type: header_string(&resp, reqwest::header::CONTENT_TYPE),
            content_length: header_string(&resp, reqwest::header::CONTENT_LENGTH)
                .and_then(|s| s.parse().ok()),
        };
        tracing::debug!("probe {target} -> {}", outcome.status);
        Ok(outcome)
    }

    fn health(&self) -> ServiceHealth {
        let timeouts = self.consecutive_timeouts.load(Ordering::Relaxed);
        if timeouts >= self.degraded_after {
            ServiceHealth::Degraded {
                consecutive_timeouts: timeouts,
            }
        } else {
            ServiceHealth::Healthy
        }
    }
}

fn header_string(resp: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn status_text(status: u16) -> String {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("unexpected status")
        .to_string()
}

fn classify_error(e: &reqwest::Error) -> FetchFailure {
    if e.is_timeout() {
        FetchFailure::timeout(e.to_string())
    } else if e.is_builder() {
        FetchFailure::invalid_url(e.to_string())
    } else {
        FetchFailure::network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(&ScopeConfig::default()).unwrap()
    }

    #[test]
    fn test_retry_delay_doubles() {
        let p = RetryPolicy::new(3, Duration::from_millis(500));
        assert_eq!(p.delay(1), Duration::from_millis(500));
        assert_eq!(p.delay(2), Duration::from_millis(1000));
        assert_eq!(p.delay(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_target_resolution() {
        let f = fetcher();
        assert_eq!(
            f.target("/add/alice?tab=Spotlight").unwrap().as_str(),
            "https://www.snapchat.com/add/alice?tab=Spotlight"
        );
        assert_eq!(
            f.target("https://cdn.example.com/v.mp4").unwrap().as_str(),
            "https://cdn.example.com/v.mp4"
        );
        assert_eq!(
            f.target("//cdn.example.com/v.mp4").unwrap().as_str(),
            "https://cdn.example.com/v.mp4"
        );
        assert!(f.target("   ").is_err());
    }

    #[test]
    fn test_invalid_base_is_rejected() {
        let cfg = ScopeConfig {
            base_url: "::nope".into(),
            ..Default::default()
        };
        let err = HttpFetcher::new(&cfg).err().unwrap();
        assert_eq!(err.kind, FailureKind::InvalidUrl);
    }

    #[test]
    fn test_probe_outcome_video_detection() {
        let mut p = ProbeOutcome {
            url: "https://cdn.example.com/a".into(),
            status: 200,
            content_type: Some("video/mp4; codecs=avc1".into()),
            content_length: Some(1024),
        };
        assert!(p.is_video());
        p.content_type = Some("application/vnd.apple.mpegurl".into());
        assert!(p.is_video());
        p.content_type = Some("image/jpeg".into());
        assert!(!p.is_video());
        p.content_type = Some("video/mp4".into());
        p.status = 404;
        assert!(!p.is_video());
    }

    #[test]
    fn test_new_fetcher_is_healthy() {
        assert_eq!(fetcher().health(), ServiceHealth::Healthy);
    }
}
