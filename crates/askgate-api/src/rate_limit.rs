//! Fixed-window rate limiter middleware.
//!
//! Counts requests per wall-clock second with atomics; requests beyond the
//! limit within the same second get 429.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Extension, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;

#[derive(Clone)]
pub struct RateLimiter {
    max_per_sec: u64,
    count: Arc<AtomicU64>,
    /// Epoch second of the current window.
    window: Arc<AtomicU64>,
}

impl RateLimiter {
    pub fn new(max_per_sec: u64) -> Self {
        Self {
            max_per_sec,
            count: Arc::new(AtomicU64::new(0)),
            window: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Try to take a permit in the current second.
    pub fn try_acquire(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.try_acquire_at(now)
    }

    fn try_acquire_at(&self, now: u64) -> bool {
        let current = self.window.load(Ordering::Relaxed);
        if now != current
            && self
                .window
                .compare_exchange(current, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            self.count.store(1, Ordering::Relaxed);
            return self.max_per_sec > 0;
        }
        self.count.fetch_add(1, Ordering::Relaxed) < self.max_per_sec
    }
}

pub async fn rate_limit_middleware(
    Extension(limiter): Extension<RateLimiter>,
    req: Request,
    next: Next,
) -> Response {
    if limiter.try_acquire() {
        next.run(req).await
    } else {
        ApiError::TooManyRequests("Rate limit exceeded".to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_within_one_second() {
        let limiter = RateLimiter::new(3);
        assert!(limiter.try_acquire_at(10));
        assert!(limiter.try_acquire_at(10));
        assert!(limiter.try_acquire_at(10));
        assert!(!limiter.try_acquire_at(10));
    }

    #[test]
    fn test_new_second_resets_window() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.try_acquire_at(10));
        assert!(!limiter.try_acquire_at(10));
        assert!(limiter.try_acquire_at(11));
    }

    #[test]
    fn test_clones_share_counters() {
        let limiter = RateLimiter::new(1);
        let other = limiter.clone();
        assert!(limiter.try_acquire_at(5));
        assert!(!other.try_acquire_at(5));
    }
}
