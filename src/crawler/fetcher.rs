//! Polite, retrying fetcher
//!
//! This module handles every page request of the pipeline:
//! - robots.txt checks before any request to a host
//! - per-host rate limiting through [`RateLimiter`]
//! - bounded retries with exponential backoff on transient failures
//! - recording each successful response in the snapshot store before returning it

use crate::config::{FetcherConfig, UserAgentConfig};
use crate::crawler::rate_limit::RateLimiter;
use crate::crawler::transport::{RawResponse, Transport, TransportError};
use crate::robots::{fetch_robots, ParsedRobots, RobotsCache};
use crate::storage::{Snapshot, SnapshotStore};
use crate::url::{host_key, normalize_url};
use crate::{FetchError, FetchErrorKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Retrieves URLs on behalf of a site and archives the responses
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    store: SnapshotStore,
    limiter: RateLimiter,
    robots: RobotsCache,
    config: FetcherConfig,
    product_token: String,
}

impl Fetcher {
    /// Creates a fetcher
    ///
    /// # Arguments
    ///
    /// * `transport` - Where requests go
    /// * `store` - Where successful responses are recorded
    /// * `config` - Rate, burst and retry settings
    /// * `user_agent` - Its crawler name is the robots.txt product token
    pub fn new(
        transport: Arc<dyn Transport>,
        store: SnapshotStore,
        config: &FetcherConfig,
        user_agent: &UserAgentConfig,
    ) -> Self {
        Self {
            transport,
            store,
            limiter: RateLimiter::new(config),
            robots: RobotsCache::new(),
            config: config.clone(),
            product_token: user_agent.crawler_name.clone(),
        }
    }

    /// Fetches a URL and records the response as a snapshot of `site_id`
    ///
    /// # Request Flow
    ///
    /// 1. Normalize the URL
    /// 2. Check robots.txt for the host (fetched and cached on first use)
    /// 3. Wait for a token from the host's bucket
    /// 4. Send the request; retry transient failures with exponential backoff
    /// 5. Store the body and return the stored snapshot
    ///
    /// # Retry Logic
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | Timeout, connection error | Retry |
    /// | HTTP 429, HTTP 5xx | Retry (429 honors `Retry-After` up to the backoff cap) |
    /// | Other HTTP 4xx | Fail immediately with `HttpError` |
    /// | Disallowed by robots.txt | Fail immediately with `Blocked` |
    ///
    /// # Returns
    ///
    /// * `Ok(Snapshot)` - The response, already durable in the snapshot store
    ///
    /// Bodies are archived once per site and content hash. When a second URL
    /// answers with a body the site already has, no new record is written: the
    /// returned snapshot carries the archived hash and fetch time but the URL that
    /// was just fetched, and later listings show only the first URL.
    /// * `Err(FetchError)` - The failure kind and the number of attempts made
    pub async fn fetch(&self, site_id: &str, url: &str) -> Result<Snapshot, FetchError> {
        let fail = |url: &str, kind: FetchErrorKind, attempts: u32| FetchError {
            url: url.to_string(),
            kind,
            attempts,
        };

        let url = normalize_url(url).map_err(|e| fail(url, FetchErrorKind::InvalidUrl(e.to_string()), 0))?;
        let host = host_key(&url)
            .ok_or_else(|| fail(url.as_str(), FetchErrorKind::InvalidUrl("missing host".to_string()), 0))?;

        let robots = self.robots_for(&url, &host).await;
        if !robots.is_allowed(url.as_str(), &self.product_token) {
            debug!("Blocked by robots.txt: {}", url);
            return Err(fail(url.as_str(), FetchErrorKind::Blocked, 0));
        }

        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;

            let result = {
                let _permit = self.limiter.acquire(&host).await;
                debug!("GET {} (attempt {}/{})", url, attempt, max_attempts);
                self.transport.get(&url).await
            };

            let (kind, retry_after) = match result {
                Ok(response) if response.is_success() => {
                    let stored = self
                        .store
                        .put(site_id, url.as_str(), &response.body, response.content_type())
                        .map_err(|e| fail(url.as_str(), FetchErrorKind::Storage(e.to_string()), attempt))?;
                    if stored.url != url.as_str() {
                        debug!("{} has the same body as archived {}", url, stored.url);
                    }
                    return Ok(Snapshot {
                        url: url.to_string(),
                        ..stored
                    });
                }
                Ok(response) => (
                    FetchErrorKind::HttpError(response.status),
                    retry_after(&response),
                ),
                Err(TransportError::Timeout) => (FetchErrorKind::Timeout, None),
                Err(TransportError::Connect(msg)) | Err(TransportError::Other(msg)) => {
                    (FetchErrorKind::NetworkError(msg), None)
                }
            };

            if !kind.is_transient() || attempt >= max_attempts {
                return Err(fail(url.as_str(), kind, attempt));
            }

            let delay = self.backoff_delay(attempt, retry_after);
            warn!(
                "Fetch of {} failed ({}), retrying in {:?} (attempt {}/{})",
                url, kind, delay, attempt, max_attempts
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Returns the robots rules for a host, fetching them on a cache miss
    async fn robots_for(&self, url: &Url, host: &str) -> ParsedRobots {
        if let Some(robots) = self.robots.get(host) {
            return robots;
        }

        let mut permit = self.limiter.acquire(host).await;
        let lookup = fetch_robots(self.transport.as_ref(), url).await;
        if let Some(delay) = lookup.robots.crawl_delay(&self.product_token) {
            permit.apply_crawl_delay(delay);
        }
        drop(permit);

        if lookup.cacheable {
            self.robots.insert(host, lookup.robots.clone());
        }
        lookup.robots
    }

    /// Delay before retry number `attempt` (1-based)
    fn backoff_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let cap = Duration::from_millis(self.config.max_backoff_ms);
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = Duration::from_millis(self.config.initial_backoff_ms.saturating_mul(1 << exponent));
        backoff.max(retry_after.unwrap_or(Duration::ZERO)).min(cap)
    }
}

/// `Retry-After` given in seconds
fn retry_after(response: &RawResponse) -> Option<Duration> {
    response
        .headers
        .get("retry-after")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
