//! Prelude module for common re-exports.
//!
//! ```rust
//! use ems_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};

// ─── Channel Metadata ───────────────────────────────────────────────
pub use crate::types::{AccessMode, Level, Unit};

// ─── Supervisor ─────────────────────────────────────────────────────
pub use crate::watchdog::{Health, LivenessReport, NoopWatchdog, Watchdog, WatchdogError};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{CHANNEL_STALE_AFTER_MS, CYCLE_TIME_MS};
