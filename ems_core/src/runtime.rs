//! Composition root: builds the engine, bridge and components from an
//! [`EngineConfig`].

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use ems_common::watchdog::{NoopWatchdog, Watchdog};

use crate::bridge::{BridgeHandle, SimulatedBridge};
use crate::clock::SystemClock;
use crate::component::battery::{BatteryDevice, BatteryHardware};
use crate::component::{ServiceContext, SimulatedBattery};
use crate::config::{EngineConfig, WatchdogConfig};
use crate::cycle::{CycleEngine, CycleStats};
use crate::error::CycleError;
use crate::watchdog::{HeartbeatFile, SystemdWatchdog};

/// Shared handles of one configured battery.
#[derive(Debug, Clone)]
pub struct BatteryParts {
    pub device: Arc<BatteryDevice>,
    pub hardware: Arc<BatteryHardware>,
}

/// Fully wired runtime.
#[derive(Debug)]
pub struct Runtime {
    engine: CycleEngine,
    bridge: BridgeHandle,
    batteries: Vec<(String, BatteryParts)>,
}

impl Runtime {
    pub fn engine(&self) -> &CycleEngine {
        &self.engine
    }

    /// Mutable engine access, e.g. to add controllers before running.
    pub fn engine_mut(&mut self) -> &mut CycleEngine {
        &mut self.engine
    }

    pub fn bridge(&self) -> &BridgeHandle {
        &self.bridge
    }

    pub fn battery(&self, id: &str) -> Option<&BatteryParts> {
        self.batteries
            .iter()
            .find(|(battery_id, _)| battery_id == id)
            .map(|(_, parts)| parts)
    }

    pub fn run(&mut self, max_cycles: Option<u64>) -> Result<CycleStats, CycleError> {
        self.engine.run(max_cycles)
    }
}

/// Build the runtime with the system clock and the configured watchdog.
pub fn build(config: &EngineConfig) -> Result<Runtime, CycleError> {
    let services = ServiceContext::new(
        Arc::new(SystemClock),
        Duration::from_millis(config.channels.stale_after_ms),
    );
    let watchdog = make_watchdog(&config.watchdog)?;
    build_with(config, &services, watchdog)
}

/// Build the runtime with explicit services, e.g. a manual clock.
pub fn build_with(
    config: &EngineConfig,
    services: &ServiceContext,
    watchdog: Box<dyn Watchdog>,
) -> Result<Runtime, CycleError> {
    let mut engine = CycleEngine::new(config.cycle.period(), services)
        .with_watchdog(&config.shared.service_name, watchdog);

    let bridge = SimulatedBridge::spawn(config.bridge.id.clone(), config.bridge.idle_tasks)
        .map_err(|e| CycleError::Wiring(e.to_string()))?;
    let handle = bridge.handle();

    let mut batteries = Vec::with_capacity(config.batteries.len());
    for battery_config in &config.batteries {
        let battery = SimulatedBattery::new(battery_config, services);
        let device = battery.device();
        engine.register_component(device.as_ref());
        for task in battery.bridge_tasks() {
            handle.add_task(&battery_config.id, task);
        }
        batteries.push((
            battery_config.id.clone(),
            BatteryParts {
                device,
                hardware: battery.hardware(),
            },
        ));
        engine.subscribe(Box::new(battery));
    }
    engine.subscribe(Box::new(bridge));

    info!(
        service = %config.shared.service_name,
        period_ms = config.cycle.period_ms,
        batteries = batteries.len(),
        bridge = %config.bridge.id,
        "runtime assembled"
    );
    Ok(Runtime {
        engine,
        bridge: handle,
        batteries,
    })
}

fn make_watchdog(config: &WatchdogConfig) -> Result<Box<dyn Watchdog>, CycleError> {
    Ok(match config {
        WatchdogConfig::None => Box::new(NoopWatchdog),
        WatchdogConfig::Systemd => Box::new(SystemdWatchdog::from_env()?),
        WatchdogConfig::HeartbeatFile { path, every_cycles } => {
            Box::new(HeartbeatFile::new(path.clone(), *every_cycles))
        }
    })
}
