use std::collections::VecDeque;
use std::hash::Hash;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Sliding-window limiter keyed by `K`: at most `limit` hits in any span of
/// `window`.
pub struct WindowLimiter<K: Eq + Hash> {
    /// key -> hit times inside the window, oldest first
    entries: DashMap<K, VecDeque<Instant>>,
    limit: usize,
    window: Duration,
}

impl<K: Eq + Hash> WindowLimiter<K> {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            limit,
            window,
        }
    }

    /// Count an attempt. Returns Ok(()) or Err with retry-after seconds.
    pub fn check(&self, key: K) -> Result<(), u64> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: K, now: Instant) -> Result<(), u64> {
        let mut hits = self.entries.entry(key).or_default();

        while let Some(&oldest) = hits.front() {
            if now.duration_since(oldest) < self.window {
                break;
            }
            hits.pop_front();
        }

        if hits.len() >= self.limit {
            let retry_after = hits
                .front()
                .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(self.window);
            return Err(retry_after.as_secs().max(1));
        }

        hits.push_back(now);
        Ok(())
    }

    /// Remove keys with no hit in the last `max_age`.
    pub fn cleanup(&self, max_age: Duration) {
        let now = Instant::now();
        self.entries.retain(|_, hits| {
            hits.back()
                .is_some_and(|latest| now.duration_since(*latest) < max_age)
        });
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

/// Recovery requests per normalized email: 5 per 15 minutes.
pub type IssuanceRateLimiter = WindowLimiter<String>;

/// Verify/reset attempts per client IP: 30 per 15 minutes.
pub type TokenAttemptLimiter = WindowLimiter<IpAddr>;

pub fn issuance_limiter() -> IssuanceRateLimiter {
    WindowLimiter::new(5, Duration::from_secs(15 * 60))
}

pub fn token_attempt_limiter() -> TokenAttemptLimiter {
    WindowLimiter::new(30, Duration::from_secs(15 * 60))
}
