use std::time::{Duration, Instant};

/// Token bucket enforcing the request budget of a single host
///
/// The bucket starts full. Each request takes one token; tokens refill
/// continuously at `refill_per_sec` up to `capacity`.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Maximum tokens held (burst size)
    capacity: f64,

    /// Tokens currently available
    tokens: f64,

    /// Refill rate in tokens per second
    refill_per_sec: f64,

    /// When `tokens` was last brought up to date
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a full bucket
    ///
    /// # Arguments
    ///
    /// * `capacity` - Burst size, at least 1
    /// * `refill_per_sec` - Sustained requests per second
    /// * `now` - The current time instant
    pub fn new(capacity: u32, refill_per_sec: f64, now: Instant) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec,
            last_refill: now,
        }
    }

    /// Adds the tokens earned since the last refill
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Takes one token if available
    ///
    /// # Returns
    ///
    /// * `Ok(())` - A token was taken, the request may go out now
    /// * `Err(Duration)` - Time to wait before a token is available
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(self.time_until_available())
        }
    }

    /// Time until one whole token is available, as of the last refill
    pub fn time_until_available(&self) -> Duration {
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        let missing = 1.0 - self.tokens;
        Duration::from_secs_f64(missing / self.refill_per_sec)
    }

    /// Lowers the refill rate and burst, never raising them
    ///
    /// Used when robots.txt asks for a crawl delay slower than the configured rate.
    pub fn slow_down_to(&mut self, refill_per_sec: f64, now: Instant) {
        self.refill(now);
        if refill_per_sec < self.refill_per_sec {
            self.refill_per_sec = refill_per_sec;
            self.capacity = 1.0;
            self.tokens = self.tokens.min(self.capacity);
        }
    }

    /// Current refill rate in tokens per second
    pub fn rate(&self) -> f64 {
        self.refill_per_sec
    }

    /// Whole tokens currently available
    pub fn available(&self) -> u32 {
        self.tokens.floor() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_bucket_is_full() {
        let now = Instant::now();
        let bucket = TokenBucket::new(3, 1.0, now);
        assert_eq!(bucket.available(), 3);
        assert_eq!(bucket.time_until_available(), Duration::ZERO);
    }

    #[test]
    fn test_burst_then_wait() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(2, 2.0, now);

        assert!(bucket.try_acquire(now).is_ok());
        assert!(bucket.try_acquire(now).is_ok());

        let wait = bucket.try_acquire(now).unwrap_err();
        assert_eq!(wait, Duration::from_millis(500));
    }

    #[test]
    fn test_refill_over_time() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(1, 1.0, start);
        assert!(bucket.try_acquire(start).is_ok());
        assert!(bucket.try_acquire(start + Duration::from_millis(400)).is_err());
        assert!(bucket.try_acquire(start + Duration::from_millis(1000)).is_ok());
    }

    #[test]
    fn test_refill_capped_at_capacity() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(2, 10.0, start);
        bucket.refill(start + Duration::from_secs(60));
        assert_eq!(bucket.available(), 2);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(0, 1.0, now);
        assert!(bucket.try_acquire(now).is_ok());
    }

    #[test]
    fn test_slow_down_only_lowers() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(4, 2.0, now);

        bucket.slow_down_to(5.0, now);
        assert_eq!(bucket.rate(), 2.0);
        assert_eq!(bucket.available(), 4);

        bucket.slow_down_to(0.5, now);
        assert_eq!(bucket.rate(), 0.5);
        assert_eq!(bucket.available(), 1);
    }
}
