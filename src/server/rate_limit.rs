use std::time::{Duration, Instant};

use action_flow::RateLimitConfig;
use dashmap::DashMap;

/// Per-client request budgets for exposed flows.
///
/// Each `<flow>:<client>` key owns a bucket holding `requests` tokens that refills linearly over
/// `windowSecs`, so a burst up to the full budget is allowed after a quiet period.
#[derive(Default)]
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one token for `key`. On refusal returns how long until the next token is available.
    pub fn check(&self, key: &str, limit: &RateLimitConfig) -> Result<(), Duration> {
        if limit.requests == 0 {
            return Ok(());
        }
        let rate = Rate::from(limit);
        let now = Instant::now();
        self.buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::full(rate, now))
            .take(rate, now)
    }

    pub fn allow(&self, key: &str, limit: &RateLimitConfig) -> bool {
        self.check(key, limit).is_ok()
    }

    /// Drop buckets untouched for `max_idle`; returns how many were removed.
    pub fn prune_idle(&self, max_idle: Duration) -> usize {
        if max_idle.is_zero() {
            return 0;
        }
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.touched) < max_idle);
        before.saturating_sub(self.buckets.len())
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[derive(Clone, Copy)]
struct Rate {
    capacity: f64,
    per_sec: f64,
}

impl From<&RateLimitConfig> for Rate {
    fn from(limit: &RateLimitConfig) -> Self {
        let capacity = f64::from(limit.requests);
        Self {
            capacity,
            per_sec: capacity / limit.window_secs.max(1) as f64,
        }
    }
}

struct Bucket {
    available: f64,
    touched: Instant,
}

impl Bucket {
    fn full(rate: Rate, now: Instant) -> Self {
        Self {
            available: rate.capacity,
            touched: now,
        }
    }

    fn take(&mut self, rate: Rate, now: Instant) -> Result<(), Duration> {
        let refilled = now.duration_since(self.touched).as_secs_f64() * rate.per_sec;
        self.available = (self.available + refilled).min(rate.capacity);
        self.touched = now;
        if self.available >= 1.0 {
            self.available -= 1.0;
            return Ok(());
        }
        let missing = 1.0 - self.available;
        Err(Duration::from_secs_f64(missing / rate.per_sec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(requests: u32, window_secs: u64) -> RateLimitConfig {
        RateLimitConfig {
            requests,
            window_secs,
        }
    }

    #[test]
    fn budget_is_per_client() {
        let limiter = RateLimiter::new();
        let hourly = limit(2, 3_600);
        assert!(limiter.allow("flow:1.2.3.4", &hourly));
        assert!(limiter.allow("flow:1.2.3.4", &hourly));
        assert!(!limiter.allow("flow:1.2.3.4", &hourly));
        assert!(limiter.allow("flow:5.6.7.8", &hourly));
        assert_eq!(limiter.len(), 2);
    }

    #[test]
    fn refusal_reports_wait_until_next_token() {
        let limiter = RateLimiter::new();
        let one_per_minute = limit(1, 60);
        assert!(limiter.check("flow:c", &one_per_minute).is_ok());
        let wait = limiter.check("flow:c", &one_per_minute).unwrap_err();
        assert!(wait > Duration::from_secs(55) && wait <= Duration::from_secs(60));
    }

    #[test]
    fn zero_requests_disables_limiting() {
        let limiter = RateLimiter::new();
        for _ in 0..10 {
            assert!(limiter.allow("flow:client", &limit(0, 60)));
        }
        assert!(limiter.is_empty());
    }

    #[test]
    fn prune_idle_removes_stale_buckets() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        limiter.buckets.insert(
            "flow:fresh".into(),
            Bucket {
                available: 5.0,
                touched: now,
            },
        );
        limiter.buckets.insert(
            "flow:stale".into(),
            Bucket {
                available: 0.0,
                touched: now - Duration::from_secs(600),
            },
        );

        assert_eq!(limiter.prune_idle(Duration::from_secs(300)), 1);
        assert!(limiter.buckets.contains_key("flow:fresh"));
        assert!(!limiter.buckets.contains_key("flow:stale"));
        assert_eq!(limiter.prune_idle(Duration::ZERO), 0);
    }
}
