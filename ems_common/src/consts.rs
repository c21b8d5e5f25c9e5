//! System-wide constants for the EMS workspace.
//!
//! Single source of truth for numeric limits and defaults shared by the
//! runtime and its collaborators.

/// Default scan-cycle period in milliseconds (1 Hz).
pub const CYCLE_TIME_MS: u64 = 1000;

/// Shortest accepted scan-cycle period [ms].
pub const CYCLE_TIME_MS_MIN: u64 = 10;

/// Longest accepted scan-cycle period [ms].
pub const CYCLE_TIME_MS_MAX: u64 = 60_000;

/// Default staleness window for hardware-fed channels [ms].
///
/// A channel whose producer has not refreshed it within this window
/// promotes an undefined value.
pub const CHANNEL_STALE_AFTER_MS: u64 = 10_000;

/// Default retry interval of start/stop sequencers [s].
pub const START_STOP_RETRY_INTERVAL_S: u64 = 10;

/// Default retry budget of start/stop sequencers.
pub const START_STOP_MAX_ATTEMPTS: u32 = 5;

/// Upper bound for a sequencer retry budget.
pub const START_STOP_MAX_ATTEMPTS_LIMIT: u32 = 100;

/// Number of recent controller execution durations kept for diagnostics.
pub const CONTROLLER_DURATION_HISTORY: usize = 16;

/// Accepted SCHED_FIFO priority range of the engine thread.
pub const RT_PRIORITY_MIN: i32 = 1;
pub const RT_PRIORITY_MAX: i32 = 99;

/// Default heartbeat file update interval [ticks].
pub const HEARTBEAT_EVERY_CYCLES: u64 = 10;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/ems/ems.toml";

/// Component id of the cycle engine's own channels.
pub const CYCLE_COMPONENT_ID: &str = "_cycle";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_bounds_are_consistent() {
        assert!(CYCLE_TIME_MS_MIN > 0);
        assert!(CYCLE_TIME_MS_MIN <= CYCLE_TIME_MS);
        assert!(CYCLE_TIME_MS <= CYCLE_TIME_MS_MAX);
    }

    #[test]
    fn stale_window_spans_several_cycles() {
        assert!(CHANNEL_STALE_AFTER_MS >= 2 * CYCLE_TIME_MS);
    }

    #[test]
    fn retry_defaults_within_limits() {
        assert!(START_STOP_MAX_ATTEMPTS > 0);
        assert!(START_STOP_MAX_ATTEMPTS <= START_STOP_MAX_ATTEMPTS_LIMIT);
        assert!(CONTROLLER_DURATION_HISTORY > 0);
    }
}
