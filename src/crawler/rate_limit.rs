//! Per-host rate limiting
//!
//! Every host gets its own token bucket behind an async mutex. A request holds the
//! host's mutex from token acquisition until its response is read, so requests to
//! one host never overlap while different hosts proceed independently.

use crate::config::FetcherConfig;
use crate::state::TokenBucket;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Exclusive right to send one request to a host
///
/// Dropping the permit lets the next request for the host proceed.
pub struct HostPermit {
    host: String,
    bucket: OwnedMutexGuard<TokenBucket>,
}

impl HostPermit {
    /// Slows the host's bucket down to one request per `delay`
    pub fn apply_crawl_delay(&mut self, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        let rate = 1.0 / delay.as_secs_f64();
        self.bucket.slow_down_to(rate, Instant::now());
        debug!("Crawl-delay {:?} applied to {}", delay, self.host);
    }

    /// Current refill rate of the host's bucket
    pub fn rate(&self) -> f64 {
        self.bucket.rate()
    }
}

/// Hands out per-host permits according to each host's token bucket
pub struct RateLimiter {
    requests_per_second: f64,
    burst: u32,
    buckets: Mutex<HashMap<String, Arc<AsyncMutex<TokenBucket>>>>,
}

impl RateLimiter {
    pub fn new(config: &FetcherConfig) -> Self {
        Self {
            requests_per_second: config.requests_per_second,
            burst: config.burst,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn bucket(&self, host: &str) -> Arc<AsyncMutex<TokenBucket>> {
        let mut buckets = self.buckets.lock().unwrap_or_else(|p| p.into_inner());
        buckets
            .entry(host.to_string())
            .or_insert_with(|| {
                Arc::new(AsyncMutex::new(TokenBucket::new(
                    self.burst,
                    self.requests_per_second,
                    Instant::now(),
                )))
            })
            .clone()
    }

    /// Waits until a request to `host` may be sent
    ///
    /// Blocks while another request to the same host holds its permit, then
    /// until the host's bucket has a token.
    pub async fn acquire(&self, host: &str) -> HostPermit {
        let mut bucket = self.bucket(host).lock_owned().await;
        loop {
            match bucket.try_acquire(Instant::now()) {
                Ok(()) => break,
                Err(wait) => {
                    debug!("Rate limit for {}: waiting {:?}", host, wait);
                    tokio::time::sleep(wait).await;
                }
            }
        }
        HostPermit {
            host: host.to_string(),
            bucket,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(rps: f64, burst: u32) -> RateLimiter {
        RateLimiter::new(&FetcherConfig {
            requests_per_second: rps,
            burst,
            ..FetcherConfig::default()
        })
    }

    #[tokio::test]
    async fn test_burst_is_immediate() {
        let limiter = limiter(1.0, 3);
        let start = Instant::now();
        for _ in 0..3 {
            drop(limiter.acquire("a.test").await);
        }
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_waits_for_refill() {
        let limiter = limiter(10.0, 1);
        let start = Instant::now();
        drop(limiter.acquire("a.test").await);
        drop(limiter.acquire("a.test").await);
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn test_hosts_are_independent() {
        let limiter = limiter(0.1, 1);
        let start = Instant::now();
        let _a = limiter.acquire("a.test").await;
        let _b = limiter.acquire("b.test").await;
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_same_host_is_serialized() {
        let limiter = Arc::new(limiter(100.0, 10));
        let held = limiter.acquire("a.test").await;

        let contender = {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                let _permit = limiter.acquire("a.test").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(held);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_crawl_delay_slows_host() {
        let limiter = limiter(5.0, 5);
        let mut permit = limiter.acquire("a.test").await;
        permit.apply_crawl_delay(Duration::from_secs(2));
        assert_eq!(permit.rate(), 0.5);
        drop(permit);

        let permit = limiter.acquire("a.test").await;
        assert_eq!(permit.rate(), 0.5);
    }
}
