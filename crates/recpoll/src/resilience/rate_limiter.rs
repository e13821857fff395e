//! Fixed-window request admission.
//!
//! Two rules: at most `max_requests` grants per window, and at least
//! `min_interval` between consecutive grants. [`RateLimiter::admit`] rejects
//! a request that comes too soon; [`RateLimiter::acquire`] reserves the next
//! free slot and sleeps until it. Counters only move on a grant.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::RateLimitConfig;

#[derive(Debug)]
struct WindowState {
    window_start: Instant,
    granted: u32,
    last_granted: Option<Instant>,
}

#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    min_interval: Duration,
    state: Mutex<WindowState>,
}

/// Window occupancy, for the status surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterSnapshot {
    pub granted_in_window: u32,
    pub max_requests: u32,
    pub window_elapsed_ms: u64,
    pub window_ms: u64,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration, min_interval: Duration) -> Self {
        Self {
            max_requests,
            window,
            min_interval,
            state: Mutex::new(WindowState {
                window_start: Instant::now(),
                granted: 0,
                last_granted: None,
            }),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            config.max_requests_per_minute,
            Duration::from_secs(config.window_secs),
            Duration::from_millis(config.min_interval_ms),
        )
    }

    fn roll_window(&self, state: &mut WindowState, now: Instant) {
        if now.saturating_duration_since(state.window_start) >= self.window {
            state.window_start = now;
            state.granted = 0;
        }
    }

    /// Grants one request, or returns false without touching the counters.
    pub fn admit(&self) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.roll_window(&mut state, now);

        if state.granted >= self.max_requests {
            tracing::debug!(
                granted = state.granted,
                max_requests = self.max_requests,
                "Rate limit window exhausted"
            );
            return false;
        }

        if let Some(last) = state.last_granted {
            if now.saturating_duration_since(last) < self.min_interval {
                tracing::trace!("Request spacing below minimum interval");
                return false;
            }
        }

        state.granted += 1;
        state.last_granted = Some(now);
        true
    }

    /// Grants one request, waiting out the minimum spacing if needed.
    ///
    /// Concurrent callers get consecutive slots `min_interval` apart. Returns
    /// false only when the window's quota is spent.
    pub async fn acquire(&self) -> bool {
        let slot = {
            let now = Instant::now();
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            self.roll_window(&mut state, now);

            if state.granted >= self.max_requests {
                tracing::debug!(
                    granted = state.granted,
                    max_requests = self.max_requests,
                    "Rate limit window exhausted"
                );
                return false;
            }

            let slot = state
                .last_granted
                .map_or(now, |last| (last + self.min_interval).max(now));
            state.granted += 1;
            state.last_granted = Some(slot);
            slot
        };

        let wait = slot.saturating_duration_since(Instant::now());
        if !wait.is_zero() {
            tracing::trace!(wait_ms = wait.as_millis() as u64, "Waiting for request slot");
            tokio::time::sleep_until(slot).await;
        }
        true
    }

    pub fn snapshot(&self) -> RateLimiterSnapshot {
        let now = Instant::now();
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let elapsed = now.saturating_duration_since(state.window_start);
        let expired = elapsed >= self.window;

        RateLimiterSnapshot {
            granted_in_window: if expired { 0 } else { state.granted },
            max_requests: self.max_requests,
            window_elapsed_ms: if expired { 0 } else { elapsed.as_millis() as u64 },
            window_ms: self.window.as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_grants_capped_per_window() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60), Duration::ZERO);

        let granted = (0..10).filter(|_| limiter.admit()).count();
        assert_eq!(granted, 3);
        assert_eq!(limiter.snapshot().granted_in_window, 3);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(limiter.admit());
        assert_eq!(limiter.snapshot().granted_in_window, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_interval_enforced() {
        let limiter = RateLimiter::new(50, Duration::from_secs(60), Duration::from_millis(200));

        assert!(limiter.admit());
        assert!(!limiter.admit());

        tokio::time::advance(Duration::from_millis(199)).await;
        assert!(!limiter.admit());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(limiter.admit());
    }

    #[tokio::test(start_paused = true)]
    async fn test_denial_does_not_consume() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60), Duration::from_millis(100));

        assert!(limiter.admit());
        for _ in 0..5 {
            assert!(!limiter.admit());
        }
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(limiter.admit());
        assert_eq!(limiter.snapshot().granted_in_window, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_ceiling_over_many_ticks() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60), Duration::from_millis(200));
        let mut granted = 0;
        for _ in 0..299 {
            if limiter.admit() {
                granted += 1;
            }
            tokio::time::advance(Duration::from_millis(200)).await;
        }
        // 299 ticks of 200ms stay inside the first window.
        assert_eq!(granted, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_resets_after_window() {
        let limiter = RateLimiter::from_config(&RateLimitConfig::default());
        assert!(limiter.admit());
        tokio::time::advance(Duration::from_secs(61)).await;
        let snapshot = limiter.snapshot();
        assert_eq!(snapshot.granted_in_window, 0);
        assert_eq!(snapshot.max_requests, 50);
        assert_eq!(snapshot.window_ms, 60_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_spaces_concurrent_callers() {
        let limiter = RateLimiter::new(50, Duration::from_secs(60), Duration::from_millis(200));
        let start = Instant::now();

        let (a, b, c) = tokio::join!(limiter.acquire(), limiter.acquire(), limiter.acquire());

        assert!(a && b && c);
        assert!(start.elapsed() >= Duration::from_millis(400));
        assert!(start.elapsed() < Duration::from_millis(600));
        assert_eq!(limiter.snapshot().granted_in_window, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_skips_when_quota_spent() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60), Duration::from_millis(200));

        assert!(limiter.acquire().await);
        assert!(limiter.acquire().await);
        assert!(!limiter.acquire().await);
        assert!(!limiter.admit());
    }
}
