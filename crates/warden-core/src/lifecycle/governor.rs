//! Restart circuit breaker, one per sandbox.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::RestartPolicy;
use crate::error::WardenError;

/// Counts restarts inside a cooldown window.
///
/// Once `max_restarts` restarts have been admitted and the last one is less
/// than `cooldown` old, further restarts are refused. The count starts over
/// when the cooldown has elapsed since the last admitted restart, or when
/// [`reset`](Self::reset) is called after an explicit stop.
#[derive(Debug, Clone)]
pub struct RestartGovernor {
    restart_count: u32,
    last_restart: Option<Instant>,
    max_restarts: u32,
    cooldown: Duration,
}

/// Serializable view of a governor at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernorSnapshot {
    pub restart_count: u32,
    pub max_restarts: u32,
    pub cooldown_ms: u64,
    pub ms_since_last_restart: Option<u64>,
    pub open: bool,
}

impl RestartGovernor {
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            restart_count: 0,
            last_restart: None,
            max_restarts: policy.max_restarts,
            cooldown: Duration::from_millis(policy.cooldown_ms),
        }
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    /// Admit one restart at `now`, or refuse with `CircuitBreakerOpen`.
    pub fn admit(&mut self, now: Instant) -> Result<(), WardenError> {
        if self.window_expired(now) {
            self.restart_count = 0;
        }
        if self.restart_count >= self.max_restarts {
            return Err(WardenError::CircuitBreakerOpen {
                restart_count: self.restart_count,
                max_restarts: self.max_restarts,
                retry_after_ms: self.retry_after(now).as_millis() as u64,
            });
        }
        self.restart_count += 1;
        self.last_restart = Some(now);
        Ok(())
    }

    pub fn is_open(&self, now: Instant) -> bool {
        !self.window_expired(now) && self.restart_count >= self.max_restarts
    }

    pub fn reset(&mut self) {
        self.restart_count = 0;
        self.last_restart = None;
    }

    pub fn snapshot(&self, now: Instant) -> GovernorSnapshot {
        GovernorSnapshot {
            restart_count: self.restart_count,
            max_restarts: self.max_restarts,
            cooldown_ms: self.cooldown.as_millis() as u64,
            ms_since_last_restart: self
                .last_restart
                .map(|t| now.saturating_duration_since(t).as_millis() as u64),
            open: self.is_open(now),
        }
    }

    fn window_expired(&self, now: Instant) -> bool {
        match self.last_restart {
            Some(last) => now.saturating_duration_since(last) >= self.cooldown,
            None => false,
        }
    }

    fn retry_after(&self, now: Instant) -> Duration {
        match self.last_restart {
            Some(last) => self
                .cooldown
                .saturating_sub(now.saturating_duration_since(last)),
            None => self.cooldown,
        }
    }
}
