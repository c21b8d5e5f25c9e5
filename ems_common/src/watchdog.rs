//! # Watchdog Trait
//!
//! Liveness contract between the scan-cycle runtime and the supervising
//! process (systemd, a container health probe, a local monitor).
//!
//! The runtime calls [`Watchdog::notify_alive`] exactly once per tick. A
//! supervisor that stops receiving these signals may restart the process.

use serde::{Deserialize, Serialize};

/// Health derived from the tick overrun rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    #[default]
    Healthy,
    /// More than 0.1 % of ticks overran their period.
    Warning,
    /// More than 1 % of ticks overran their period.
    Degraded,
    /// More than 10 % of ticks overran their period.
    Critical,
}

impl Health {
    /// Classify an overrun count relative to the number of executed ticks.
    pub fn from_overruns(overruns: u64, cycle_count: u64) -> Self {
        if cycle_count == 0 {
            return Self::Healthy;
        }
        let rate = overruns as f64 / cycle_count as f64;
        if rate > 0.1 {
            Self::Critical
        } else if rate > 0.01 {
            Self::Degraded
        } else if rate > 0.001 {
            Self::Warning
        } else {
            Self::Healthy
        }
    }
}

/// Snapshot handed to the watchdog on every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LivenessReport {
    /// Instance identifier from `[shared].service_name`.
    pub service_name: String,
    /// Ticks executed so far.
    pub cycle_count: u64,
    /// Ticks that took longer than the configured period.
    pub overruns: u64,
    /// Duration of the last tick [ms].
    pub last_cycle_ms: f64,
    /// Longest tick so far [ms].
    pub max_cycle_ms: f64,
    /// Health classification of the overrun rate.
    pub health: Health,
}

/// Error type for watchdog operations.
#[derive(Debug, thiserror::Error)]
pub enum WatchdogError {
    /// The supervisor endpoint is not available in this environment.
    #[error("watchdog not configured: {0}")]
    NotConfigured(String),

    /// Sending the signal failed.
    #[error("watchdog I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding the liveness report failed.
    #[error("watchdog encoding error: {0}")]
    Encode(String),
}

/// Supervisor liveness contract.
///
/// Failures are reported to the caller, which logs them; a broken watchdog
/// never stops the scan cycle.
pub trait Watchdog: Send {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Called once after startup, before the first tick.
    fn notify_ready(&mut self) -> Result<(), WatchdogError> {
        Ok(())
    }

    /// Called once per tick to prove liveness.
    fn notify_alive(&mut self, report: &LivenessReport) -> Result<(), WatchdogError>;

    /// Called once when the runtime leaves the scan cycle.
    fn notify_stopping(&mut self) -> Result<(), WatchdogError> {
        Ok(())
    }
}

/// Watchdog that discards every signal.
#[derive(Debug, Default)]
pub struct NoopWatchdog;

impl Watchdog for NoopWatchdog {
    fn name(&self) -> &'static str {
        "none"
    }

    fn notify_alive(&mut self, _report: &LivenessReport) -> Result<(), WatchdogError> {
        Ok(())
    }
}
