//! Fixed-window rate limiting per tool and caller.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use super::definition::RateLimit;
use crate::error::WardenError;

/// Tracked windows before expired ones are swept.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    len: Duration,
    count: u32,
}

impl Window {
    fn open(now: Instant, len: Duration) -> Self {
        Self {
            started: now,
            len,
            count: 0,
        }
    }

    fn expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started) >= self.len
    }
}

/// Call counters keyed by `(tool_id, caller)`.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<(String, String), Window>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one call, or refuse if the window's budget is spent.
    pub async fn check(
        &self,
        tool_id: &str,
        caller: &str,
        limit: RateLimit,
        now: Instant,
    ) -> Result<(), WardenError> {
        let window_len = Duration::from_millis(limit.window_ms);
        let mut windows = self.windows.lock().await;
        if windows.len() >= PRUNE_THRESHOLD {
            windows.retain(|_, w| !w.expired(now));
        }
        let window = windows
            .entry((tool_id.to_string(), caller.to_string()))
            .or_insert_with(|| Window::open(now, window_len));

        if window.expired(now) {
            *window = Window::open(now, window_len);
        }
        if window.count >= limit.max_calls {
            return Err(WardenError::RateLimitExceeded {
                tool_id: tool_id.to_string(),
                max_calls: limit.max_calls,
                window_ms: limit.window_ms,
            });
        }
        window.count += 1;
        Ok(())
    }

    /// Number of `(tool, caller)` windows currently held.
    pub async fn tracked(&self) -> usize {
        self.windows.lock().await.len()
    }

    /// Drop all windows for a tool.
    pub async fn forget_tool(&self, tool_id: &str) {
        self.windows.lock().await.retain(|(tool, _), _| tool != tool_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: RateLimit = RateLimit {
        max_calls: 2,
        window_ms: 1_000,
    };

    #[tokio::test]
    async fn test_budget_then_refusal() {
        let rl = RateLimiter::new();
        let now = Instant::now();
        assert!(rl.check("t", "alice", LIMIT, now).await.is_ok());
        assert!(rl.check("t", "alice", LIMIT, now).await.is_ok());
        let err = rl.check("t", "alice", LIMIT, now).await.unwrap_err();
        assert_eq!(err.kind(), "rate_limit_exceeded");
    }

    #[tokio::test]
    async fn test_callers_and_tools_are_independent() {
        let rl = RateLimiter::new();
        let now = Instant::now();
        rl.check("t", "alice", LIMIT, now).await.unwrap();
        rl.check("t", "alice", LIMIT, now).await.unwrap();
        assert!(rl.check("t", "bob", LIMIT, now).await.is_ok());
        assert!(rl.check("u", "alice", LIMIT, now).await.is_ok());
    }

    #[tokio::test]
    async fn test_window_expiry_restores_budget() {
        let rl = RateLimiter::new();
        let now = Instant::now();
        rl.check("t", "a", LIMIT, now).await.unwrap();
        rl.check("t", "a", LIMIT, now).await.unwrap();
        assert!(rl.check("t", "a", LIMIT, now + Duration::from_millis(999)).await.is_err());
        assert!(rl.check("t", "a", LIMIT, now + Duration::from_millis(1_000)).await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_windows_are_swept() {
        let rl = RateLimiter::new();
        let now = Instant::now();
        for i in 0..PRUNE_THRESHOLD {
            rl.check("t", &format!("caller-{i}"), LIMIT, now).await.unwrap();
        }
        assert_eq!(rl.tracked().await, PRUNE_THRESHOLD);

        let later = now + Duration::from_millis(LIMIT.window_ms);
        rl.check("t", "late", LIMIT, later).await.unwrap();
        assert_eq!(rl.tracked().await, 1);
    }

    #[tokio::test]
    async fn test_sweep_keeps_live_windows() {
        let rl = RateLimiter::new();
        let now = Instant::now();
        rl.check("t", "busy", LIMIT, now).await.unwrap();
        rl.check("t", "busy", LIMIT, now).await.unwrap();
        for i in 1..PRUNE_THRESHOLD {
            rl.check("t", &format!("caller-{i}"), LIMIT, now).await.unwrap();
        }

        let soon = now + Duration::from_millis(10);
        assert!(rl.check("t", "other", LIMIT, soon).await.is_ok());
        assert!(rl.check("t", "busy", LIMIT, soon).await.is_err());
    }

    #[tokio::test]
    async fn test_forget_tool() {
        let rl = RateLimiter::new();
        let now = Instant::now();
        rl.check("t", "a", LIMIT, now).await.unwrap();
        rl.check("t", "a", LIMIT, now).await.unwrap();
        rl.forget_tool("t").await;
        assert!(rl.check("t", "a", LIMIT, now).await.is_ok());
    }
}
