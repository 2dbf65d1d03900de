//! Rate Limiter - Controls the send rate of one run
//!
//! Sliding-window limiter shared by every job of a run. Admission is
//! checked against two rolling windows (one minute, one second) and a
//! caller over the limit waits; nothing is ever dropped.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

const MINUTE: Duration = Duration::from_secs(60);
const SECOND: Duration = Duration::from_secs(1);

/// Rate limiter for one dispatch run
pub struct RateLimiter {
    per_minute: u32,
    per_second: u32,
    state: Mutex<WindowState>,
}

#[derive(Default)]
struct WindowState {
    /// Admission instants within the last minute, oldest first
    admissions: VecDeque<Instant>,
    /// Server-requested pause
    blocked_until: Option<Instant>,
}

impl RateLimiter {
    /// Create a new rate limiter; both limits are clamped to at least one
    pub fn new(per_minute: u32, per_second: u32) -> Self {
        Self {
            per_minute: per_minute.max(1),
            per_second: per_second.max(1),
            state: Mutex::new(WindowState::default()),
        }
    }

    /// Wait until a send may start, then record it
    pub async fn acquire(&self) {
        loop {
            let wait = match self.try_acquire_at(Instant::now()) {
                Ok(()) => return,
                Err(wait) => wait,
            };
            debug!(wait_ms = wait.as_millis() as u64, "Rate limit reached, delaying send");
            sleep(wait).await;
        }
    }

    /// Admit a send at `now`, or return how long to wait before trying again
    fn try_acquire_at(&self, now: Instant) -> Result<(), Duration> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(until) = state.blocked_until {
            if until > now {
                return Err(until - now);
            }
            state.blocked_until = None;
        }

        while state
            .admissions
            .front()
            .is_some_and(|t| *t + MINUTE <= now)
        {
            state.admissions.pop_front();
        }

        if state.admissions.len() >= self.per_minute as usize {
            if let Some(oldest) = state.admissions.front() {
                return Err(at_least_one_ms(*oldest + MINUTE - now));
            }
        }

        let first_recent = state.admissions.partition_point(|t| *t + SECOND <= now);
        let recent = state.admissions.len() - first_recent;
        if recent >= self.per_second as usize {
            if let Some(oldest_recent) = state.admissions.get(first_recent) {
                return Err(at_least_one_ms(*oldest_recent + SECOND - now));
            }
        }

        state.admissions.push_back(now);
        Ok(())
    }

    /// Hold every admission for at least `delay`
    pub fn defer(&self, delay: Duration) {
        let until = Instant::now() + delay;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.blocked_until = Some(match state.blocked_until {
            Some(current) if current > until => current,
            _ => until,
        });
    }

    /// Remaining admissions in the current windows
    pub fn remaining(&self) -> RemainingQuota {
        let now = Instant::now();
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let in_minute = state.admissions.iter().filter(|t| **t + MINUTE > now).count() as u32;
        let in_second = state.admissions.iter().filter(|t| **t + SECOND > now).count() as u32;

        RemainingQuota {
            per_minute: self.per_minute.saturating_sub(in_minute),
            per_second: self.per_second.saturating_sub(in_second),
        }
    }
}

fn at_least_one_ms(wait: Duration) -> Duration {
    wait.max(Duration::from_millis(1))
}

/// Remaining quota of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemainingQuota {
    pub per_minute: u32,
    pub per_second: u32,
}

impl RemainingQuota {
    /// Get the minimum remaining across both windows
    pub fn min(&self) -> u32 {
        self.per_minute.min(self.per_second)
    }
}
