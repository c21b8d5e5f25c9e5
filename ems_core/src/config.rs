//! Runtime configuration (`ems.toml`).
//!
//! ```toml
//! [shared]
//! service_name = "ems-edge-01"
//! log_level = "info"
//!
//! [cycle]
//! period_ms = 1000
//!
//! [channels]
//! stale_after_ms = 10000
//!
//! [watchdog]
//! kind = "systemd"
//!
//! [[battery]]
//! id = "battery0"
//! start_stop = "start"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ems_common::config::{ConfigError, ConfigLoader, SharedConfig};
use ems_common::consts::{
    CHANNEL_STALE_AFTER_MS, CYCLE_TIME_MS, CYCLE_TIME_MS_MAX, CYCLE_TIME_MS_MIN,
    HEARTBEAT_EVERY_CYCLES, RT_PRIORITY_MAX, RT_PRIORITY_MIN, START_STOP_MAX_ATTEMPTS_LIMIT,
};

use crate::component::SimulatedBatteryConfig;
use crate::cycle::RtParams;

fn default_period_ms() -> u64 {
    CYCLE_TIME_MS
}

fn default_stale_after_ms() -> u64 {
    CHANNEL_STALE_AFTER_MS
}

fn default_heartbeat_every() -> u64 {
    HEARTBEAT_EVERY_CYCLES
}

fn default_bridge_id() -> String {
    "sim0".to_string()
}

/// `[cycle]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Scan-cycle period [ms].
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            period_ms: default_period_ms(),
        }
    }
}

impl CycleConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// `[channels]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Staleness window of hardware-fed channels [ms].
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: default_stale_after_ms(),
        }
    }
}

/// `[watchdog]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WatchdogConfig {
    #[default]
    None,
    /// `sd_notify` via `$NOTIFY_SOCKET`.
    Systemd,
    HeartbeatFile {
        path: PathBuf,
        #[serde(default = "default_heartbeat_every")]
        every_cycles: u64,
    },
}

/// `[rt]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RtConfig {
    pub cpu_core: Option<usize>,
    pub priority: Option<i32>,
    #[serde(default)]
    pub lock_memory: bool,
}

impl RtConfig {
    pub fn params(&self) -> RtParams {
        RtParams {
            cpu_core: self.cpu_core,
            priority: self.priority,
            lock_memory: self.lock_memory,
        }
    }
}

/// `[bridge]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bridge_id")]
    pub id: String,
    /// Extra round-robin tasks the worker services after each batch.
    #[serde(default)]
    pub idle_tasks: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            id: default_bridge_id(),
            idle_tasks: 0,
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub shared: SharedConfig,
    #[serde(default)]
    pub cycle: CycleConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub rt: RtConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default, rename = "battery")]
    pub batteries: Vec<SimulatedBatteryConfig>,
}

impl EngineConfig {
    /// Check every section against its limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        let period = self.cycle.period_ms;
        if !(CYCLE_TIME_MS_MIN..=CYCLE_TIME_MS_MAX).contains(&period) {
            return Err(invalid(format!(
                "cycle.period_ms {period} outside [{CYCLE_TIME_MS_MIN}, {CYCLE_TIME_MS_MAX}]"
            )));
        }
        if self.channels.stale_after_ms < period {
            return Err(invalid(format!(
                "channels.stale_after_ms {} shorter than cycle.period_ms {period}",
                self.channels.stale_after_ms
            )));
        }

        if let WatchdogConfig::HeartbeatFile { every_cycles: 0, .. } = self.watchdog {
            return Err(invalid("watchdog.every_cycles must be at least 1".to_string()));
        }
        if let Some(priority) = self.rt.priority {
            if !(RT_PRIORITY_MIN..=RT_PRIORITY_MAX).contains(&priority) {
                return Err(invalid(format!(
                    "rt.priority {priority} outside [{RT_PRIORITY_MIN}, {RT_PRIORITY_MAX}]"
                )));
            }
        }
        if self.bridge.id.is_empty() {
            return Err(invalid("bridge.id cannot be empty".to_string()));
        }

        let mut ids = HashSet::new();
        for battery in &self.batteries {
            validate_battery(battery)?;
            if !ids.insert(battery.id.as_str()) {
                return Err(invalid(format!("duplicate battery id '{}'", battery.id)));
            }
        }
        Ok(())
    }
}

fn validate_battery(battery: &SimulatedBatteryConfig) -> Result<(), ConfigError> {
    let id = &battery.id;
    if id.is_empty() || id.starts_with('_') || id.contains('/') {
        return Err(invalid(format!(
            "battery id '{id}' must be non-empty, not start with '_' and not contain '/'"
        )));
    }
    if !(1..=START_STOP_MAX_ATTEMPTS_LIMIT).contains(&battery.max_attempts) {
        return Err(invalid(format!(
            "battery '{id}': max_attempts {} outside [1, {START_STOP_MAX_ATTEMPTS_LIMIT}]",
            battery.max_attempts
        )));
    }
    if battery.retry_interval_s == 0 {
        return Err(invalid(format!("battery '{id}': retry_interval_s must be positive")));
    }
    if battery.initial_soc > 100 {
        return Err(invalid(format!(
            "battery '{id}': initial_soc {} above 100",
            battery.initial_soc
        )));
    }
    Ok(())
}

fn invalid(msg: String) -> ConfigError {
    ConfigError::ValidationError(msg)
}

/// Load and validate `path`.
pub fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let config = EngineConfig::load(path)?;
    config.validate()?;
    Ok(config)
}

/// Parse and validate an in-memory document.
pub fn load_config_from_str(content: &str) -> Result<EngineConfig, ConfigError> {
    let config = EngineConfig::load_str(content)?;
    config.validate()?;
    Ok(config)
}
