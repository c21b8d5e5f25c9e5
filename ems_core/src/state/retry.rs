//! Bounded, non-blocking retry bookkeeping for sequencing handlers.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use ems_common::consts::{START_STOP_MAX_ATTEMPTS, START_STOP_RETRY_INTERVAL_S};

/// How often and how many times a command is reissued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub retry_interval: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(START_STOP_RETRY_INTERVAL_S),
            max_attempts: START_STOP_MAX_ATTEMPTS,
        }
    }
}

/// Outcome of one [`RetryTracker::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    /// Desired status reached.
    Achieved,
    /// Last attempt is younger than the retry interval.
    Wait,
    /// Budget exhausted. Raise the fault and give up.
    GiveUp,
    /// Issue the command now. Carries the attempt number, starting at 1.
    Attempt(u32),
}

/// Per-handler attempt state. Reset whenever the owning state is entered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryTracker {
    last_attempt: Option<Instant>,
    attempts: u32,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[inline]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[inline]
    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }

    /// Decide what to do this tick. `Attempt` records `now` and counts the
    /// attempt; the caller must issue the command.
    pub fn step(&mut self, policy: &RetryPolicy, now: Instant, achieved: bool) -> RetryStep {
        if achieved {
            return RetryStep::Achieved;
        }
        if let Some(last) = self.last_attempt {
            if now.saturating_duration_since(last) < policy.retry_interval {
                return RetryStep::Wait;
            }
        }
        if self.attempts >= policy.max_attempts {
            return RetryStep::GiveUp;
        }
        self.last_attempt = Some(now);
        self.attempts += 1;
        RetryStep::Attempt(self.attempts)
    }
}
