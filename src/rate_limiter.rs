use crate::clock::Clock;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

const WINDOW_SECONDS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitResponse {
    pub allowed: bool,
    pub remaining: u64,
    pub reset_in: u64,
    pub retry_after: Option<u64>,
}

/// Per-caller sliding window over the last minute, kept in memory.
pub struct RateLimiter {
    enabled: bool,
    clock: Arc<dyn Clock>,
    windows: RwLock<HashMap<String, Arc<Mutex<VecDeque<DateTime<Utc>>>>>>,
}

impl RateLimiter {
    pub fn new(enabled: bool, clock: Arc<dyn Clock>) -> Self {
        Self {
            enabled,
            clock,
            windows: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Admit one call for `key` if fewer than `limit` calls were admitted in
    /// the last minute. Rejected calls are not counted.
    pub async fn check(&self, key: &str, limit: usize) -> RateLimitResponse {
        if !self.enabled {
            return RateLimitResponse {
                allowed: true,
                remaining: limit as u64,
                reset_in: 0,
                retry_after: None,
            };
        }

        let window = self.window_for(key).await;
        let now = self.clock.now();
        let cutoff = now - Duration::seconds(WINDOW_SECONDS);

        let mut calls = window.lock().await;
        while calls.front().is_some_and(|at| *at <= cutoff) {
            calls.pop_front();
        }

        let reset_in = calls
            .front()
            .map(|oldest| (*oldest + Duration::seconds(WINDOW_SECONDS) - now).num_seconds().max(0) as u64)
            .unwrap_or(WINDOW_SECONDS as u64);

        if calls.len() >= limit {
            tracing::debug!(key = key, current = calls.len(), limit = limit, "Rate limit exceeded");
            return RateLimitResponse {
                allowed: false,
                remaining: 0,
                reset_in,
                retry_after: Some(reset_in.max(1)),
            };
        }

        calls.push_back(now);
        RateLimitResponse {
            allowed: true,
            remaining: limit.saturating_sub(calls.len()) as u64,
            reset_in,
            retry_after: None,
        }
    }

    async fn window_for(&self, key: &str) -> Arc<Mutex<VecDeque<DateTime<Utc>>>> {
        if let Some(window) = self.windows.read().await.get(key) {
            return window.clone();
        }

        self.windows
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(enabled: bool) -> (ManualClock, RateLimiter) {
        let clock = ManualClock::default();
        let limiter = RateLimiter::new(enabled, Arc::new(clock.clone()));
        (clock, limiter)
    }

    #[tokio::test]
    async fn test_rate_limit_allows_within_limit() {
        let (_, limiter) = limiter(true);

        let response = limiter.check("10.0.0.1:/analyze", 3).await;
        assert!(response.allowed);
        assert_eq!(response.remaining, 2);
        assert!(response.retry_after.is_none());
    }

    #[tokio::test]
    async fn test_rate_limit_denies_over_limit() {
        let (_, limiter) = limiter(true);

        assert!(limiter.check("caller", 1).await.allowed);
        let denied = limiter.check("caller", 1).await;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.retry_after.is_some());

        // Other callers keep their own budget
        assert!(limiter.check("other", 1).await.allowed);
    }

    #[tokio::test]
    async fn test_window_slides() {
        let (clock, limiter) = limiter(true);

        for _ in 0..2 {
            assert!(limiter.check("caller", 2).await.allowed);
        }
        assert!(!limiter.check("caller", 2).await.allowed);

        clock.advance(Duration::seconds(61));
        assert!(limiter.check("caller", 2).await.allowed);
    }

    #[tokio::test]
    async fn test_disabled_limiter_always_allows() {
        let (_, limiter) = limiter(false);

        for _ in 0..10 {
            assert!(limiter.check("caller", 1).await.allowed);
        }
    }

    #[test]
    fn test_rate_limit_response_serialization() {
        let response = RateLimitResponse {
            allowed: false,
            remaining: 0,
            reset_in: 42,
            retry_after: Some(42),
        };

        let json = serde_json::to_string(&response).unwrap();
        let deserialized: RateLimitResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(response, deserialized);
    }
}
