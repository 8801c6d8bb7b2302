//! Advisory request rate limiting
//!
//! Fixed window per caller key, kept in process memory. Counters are lost on
//! restart; this is a courtesy throttle, not an access control.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub window_secs: u64,
    /// Requests allowed per window and key
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: 60,
            max_requests: 120,
        }
    }
}

struct Window {
    started: Instant,
    count: u32,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count one request for `key`.
    ///
    /// Returns `Err(retry_after_secs)` once the window is full.
    pub fn check(&self, key: &str) -> Result<(), u64> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<(), u64> {
        if !self.config.enabled {
            return Ok(());
        }
        let window = Duration::from_secs(self.config.window_secs);
        // A poisoned map only holds counters, keep using it
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        let entry = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.saturating_duration_since(entry.started) >= window {
            entry.started = now;
            entry.count = 0;
        }

        if entry.count >= self.config.max_requests {
            let elapsed = now.saturating_duration_since(entry.started);
            let retry_after = window.saturating_sub(elapsed).as_secs() + 1;
            warn!("⚠️ Rate limit exceeded for caller {}", key);
            return Err(retry_after);
        }
        entry.count += 1;
        Ok(())
    }

    /// Drop windows that ended more than one window ago
    pub fn sweep(&self) {
        let horizon = Duration::from_secs(self.config.window_secs.saturating_mul(2));
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.retain(|_, w| now.saturating_duration_since(w.started) < horizon);
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().map(|w| w.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            enabled: true,
            window_secs: 60,
            max_requests,
        })
    }

    #[test]
    fn test_allows_up_to_limit() {
        let rl = limiter(3);
        let now = Instant::now();
        for _ in 0..3 {
            assert!(rl.check_at("alice", now).is_ok());
        }
        let retry = rl.check_at("alice", now).unwrap_err();
        assert!(retry >= 1 && retry <= 61);
    }

    #[test]
    fn test_keys_are_independent() {
        let rl = limiter(1);
        let now = Instant::now();
        assert!(rl.check_at("alice", now).is_ok());
        assert!(rl.check_at("alice", now).is_err());
        assert!(rl.check_at("bob", now).is_ok());
    }

    #[test]
    fn test_window_resets() {
        let rl = limiter(1);
        let start = Instant::now();
        assert!(rl.check_at("alice", start).is_ok());
        assert!(rl.check_at("alice", start + Duration::from_secs(30)).is_err());
        assert!(rl.check_at("alice", start + Duration::from_secs(60)).is_ok());
    }

    #[test]
    fn test_disabled_never_limits() {
        let rl = RateLimiter::new(RateLimitConfig {
            enabled: false,
            window_secs: 60,
            max_requests: 0,
        });
        for _ in 0..10 {
            assert!(rl.check("alice").is_ok());
        }
        assert_eq!(rl.tracked_keys(), 0);
    }

    #[test]
    fn test_sweep_keeps_fresh_windows() {
        let rl = limiter(5);
        rl.check("alice").unwrap();
        rl.sweep();
        assert_eq!(rl.tracked_keys(), 1);
    }
}
