//! Fixed-window call limiter keyed by effective cache key.
//!
//! Guards the backend against runaway re-render loops. Deliberately coarse:
//! a burst straddling two windows can pass up to twice the limit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use crate::clock::Clock;
use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy)]
struct Window {
    calls: u32,
    reset_time: i64,
}

#[derive(Debug)]
pub struct RateLimiter {
    windows: Mutex<HashMap<String, Window>>,
    max_calls: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(max_calls: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_calls,
            window,
            clock,
        }
    }

    pub fn from_config(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(config.max_calls, config.window(), clock)
    }

    /// Count one call for `key`. Returns `false`, without counting, when the
    /// current window is already full.
    pub fn try_acquire(&self, key: &str) -> bool {
        let now = self.clock.now_millis();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let window = windows.entry(key.to_string()).or_insert(Window {
            calls: 0,
            reset_time: now + self.window.as_millis() as i64,
        });
        if now > window.reset_time {
            window.calls = 0;
            window.reset_time = now + self.window.as_millis() as i64;
        }
        if window.calls >= self.max_calls {
            debug!(key = %key, calls = window.calls, "Rate limit reached");
            return false;
        }
        window.calls += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(max: u32) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(10_000));
        (
            RateLimiter::new(max, Duration::from_millis(1000), clock.clone()),
            clock,
        )
    }

    #[test]
    fn test_rejects_past_limit_within_window() {
        let (limiter, clock) = limiter(3);
        assert!(limiter.try_acquire("k"));
        assert!(limiter.try_acquire("k"));
        clock.advance(Duration::from_millis(500));
        assert!(limiter.try_acquire("k"));
        assert!(!limiter.try_acquire("k"));
        assert!(!limiter.try_acquire("k"));
    }

    #[test]
    fn test_window_rolls_over() {
        let (limiter, clock) = limiter(1);
        assert!(limiter.try_acquire("k"));
        assert!(!limiter.try_acquire("k"));
        clock.advance(Duration::from_millis(1001));
        assert!(limiter.try_acquire("k"));
        assert!(!limiter.try_acquire("k"));
    }

    #[test]
    fn test_keys_are_independent() {
        let (limiter, _) = limiter(1);
        assert!(limiter.try_acquire("a"));
        assert!(limiter.try_acquire("b"));
        assert!(!limiter.try_acquire("a"));
        assert_eq!(limiter.windows.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_zero_limit_rejects_everything() {
        let (limiter, _) = limiter(0);
        assert!(!limiter.try_acquire("k"));
    }
}
