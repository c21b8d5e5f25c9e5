//! Controllers and their per-controller execution statistics.

use heapless::HistoryBuffer;
use std::time::Duration;

use ems_common::consts::CONTROLLER_DURATION_HISTORY;

use super::CycleContext;
use crate::error::ControllerError;

/// Control logic executed once per tick between BEFORE_CONTROLLERS and
/// AFTER_CONTROLLERS.
///
/// Controllers read the promoted process image and queue write requests.
/// Higher priority runs first; ties run in registration order. The priority
/// is read every tick.
pub trait Controller: Send {
    fn id(&self) -> &str;

    fn priority(&self) -> i32 {
        0
    }

    fn run(&mut self, ctx: &CycleContext) -> Result<(), ControllerError>;
}

/// Execution statistics of one controller.
#[derive(Debug, Clone)]
pub struct ControllerStats {
    runs: u64,
    failures: u64,
    max: Duration,
    recent: HistoryBuffer<Duration, CONTROLLER_DURATION_HISTORY>,
}

impl ControllerStats {
    pub fn new() -> Self {
        Self {
            runs: 0,
            failures: 0,
            max: Duration::ZERO,
            recent: HistoryBuffer::new(),
        }
    }

    pub(crate) fn record(&mut self, duration: Duration, ok: bool) {
        self.runs += 1;
        if !ok {
            self.failures += 1;
        }
        self.max = self.max.max(duration);
        self.recent.write(duration);
    }

    #[inline]
    pub fn runs(&self) -> u64 {
        self.runs
    }

    /// Runs that returned an error or panicked.
    #[inline]
    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn last(&self) -> Option<Duration> {
        self.recent.recent().copied()
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Mean over the retained recent durations.
    pub fn recent_mean(&self) -> Option<Duration> {
        let n = self.recent.len();
        if n == 0 {
            return None;
        }
        let total: Duration = self.recent.as_slice().iter().sum();
        Some(total / n as u32)
    }
}

impl Default for ControllerStats {
    fn default() -> Self {
        Self::new()
    }
}
