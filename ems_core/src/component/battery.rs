//! Simulated battery string.
//!
//! The component side ([`BatteryDevice`]) owns the channels and implements
//! [`StartStopDevice`] on top of them. [`SimulatedBattery`] drives the
//! start/stop sequencer in AFTER_PROCESS_IMAGE. The hardware side
//! ([`BatteryHardware`]) is an in-process model reached only through the
//! bridge tasks returned by [`SimulatedBattery::bridge_tasks`].

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use ems_common::consts::{START_STOP_MAX_ATTEMPTS, START_STOP_RETRY_INTERVAL_S};
use ems_common::types::{AccessMode, Level, Unit};

use super::{Component, ServiceContext};
use crate::bridge::BridgeTask;
use crate::channel::{ChannelDoc, ChannelSet, Staleness, Value, ValueType};
use crate::cycle::{CycleContext, Phase, PhaseListener, PhaseMask};
use crate::error::{BridgeError, ChannelError, PhaseError};
use crate::state::{
    RetryPolicy, SequenceFault, StartStopConfig, StartStopDevice, StartStopSequencer,
    StartStopState,
};
use crate::task::{ManagedTask, Priority};

// ─── Channels ───────────────────────────────────────────────────────

pub const SOC: &str = "Soc";
pub const VOLTAGE: &str = "Voltage";
pub const CURRENT: &str = "Current";
pub const TEMPERATURE: &str = "Temperature";
pub const SERIAL_NUMBER: &str = "SerialNumber";
pub const RUNNING: &str = "Running";
pub const START_STOP: &str = "StartStop";
pub const STATE_MACHINE: &str = "StateMachine";
pub const HARDWARE_FAULT: &str = "HardwareFault";
pub const RUN_FAILED: &str = "RunFailed";
pub const MAX_START_ATTEMPTS: &str = "MaxStartAttempts";
pub const MAX_STOP_ATTEMPTS: &str = "MaxStopAttempts";

static CHANNELS: &[ChannelDoc] = &[
    ChannelDoc::new(SOC, ValueType::Integer)
        .unit(Unit::Percent)
        .staleness(Staleness::Default),
    ChannelDoc::new(VOLTAGE, ValueType::Integer)
        .unit(Unit::Volt)
        .staleness(Staleness::Default),
    ChannelDoc::new(CURRENT, ValueType::Integer)
        .unit(Unit::Ampere)
        .staleness(Staleness::Default),
    ChannelDoc::new(TEMPERATURE, ValueType::Integer)
        .unit(Unit::DegreeCelsius)
        .staleness(Staleness::Default),
    ChannelDoc::new(SERIAL_NUMBER, ValueType::String),
    ChannelDoc::new(RUNNING, ValueType::Boolean)
        .staleness(Staleness::Default)
        .text("Contactors closed, string online"),
    ChannelDoc::new(START_STOP, ValueType::Boolean)
        .access(AccessMode::WriteOnly)
        .text("true = start, false = stop"),
    ChannelDoc::new(STATE_MACHINE, ValueType::Integer),
    ChannelDoc::state(HARDWARE_FAULT, Level::Fault)
        .staleness(Staleness::Default)
        .text("Battery management system reports a fault"),
    ChannelDoc::state(RUN_FAILED, Level::Fault).text("Running the state machine failed"),
    ChannelDoc::state(MAX_START_ATTEMPTS, Level::Fault)
        .text("The maximum number of start attempts failed"),
    ChannelDoc::state(MAX_STOP_ATTEMPTS, Level::Fault)
        .text("The maximum number of stop attempts failed"),
];

// ─── Configuration ──────────────────────────────────────────────────

fn default_retry_interval_s() -> u64 {
    START_STOP_RETRY_INTERVAL_S
}

fn default_max_attempts() -> u32 {
    START_STOP_MAX_ATTEMPTS
}

fn default_response_delay_ms() -> u64 {
    2_000
}

fn default_initial_soc() -> u8 {
    50
}

/// `[[battery]]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedBatteryConfig {
    pub id: String,
    #[serde(default)]
    pub start_stop: StartStopConfig,
    /// Start/stop retry interval [s].
    #[serde(default = "default_retry_interval_s")]
    pub retry_interval_s: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Time the simulated contactors need to follow a command [ms].
    #[serde(default = "default_response_delay_ms")]
    pub response_delay_ms: u64,
    #[serde(default = "default_initial_soc")]
    pub initial_soc: u8,
}

impl SimulatedBatteryConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            start_stop: StartStopConfig::default(),
            retry_interval_s: default_retry_interval_s(),
            max_attempts: default_max_attempts(),
            response_delay_ms: default_response_delay_ms(),
            initial_soc: default_initial_soc(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retry_interval: Duration::from_secs(self.retry_interval_s),
            max_attempts: self.max_attempts,
        }
    }
}

// ─── Hardware model ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatterySample {
    pub soc: i64,
    pub voltage: i64,
    pub current: i64,
    pub running: bool,
    pub fault: bool,
}

#[derive(Debug)]
struct HardwareState {
    running: bool,
    pending: Option<(bool, Instant)>,
    fault: bool,
    reachable: bool,
    soc: i64,
}

/// In-process stand-in for a battery management system.
#[derive(Debug)]
pub struct BatteryHardware {
    state: Mutex<HardwareState>,
    response_delay: Duration,
    serial: String,
}

impl BatteryHardware {
    pub fn new(serial: impl Into<String>, initial_soc: u8, response_delay: Duration) -> Self {
        Self {
            state: Mutex::new(HardwareState {
                running: false,
                pending: None,
                fault: false,
                reachable: true,
                soc: i64::from(initial_soc.min(100)),
            }),
            response_delay,
            serial: serial.into(),
        }
    }

    /// Accept a start (`true`) or stop command; it takes effect after the
    /// response delay.
    pub fn command(&self, start: bool, now: Instant) {
        self.state.lock().pending = Some((start, now + self.response_delay));
    }

    /// Read the registers. `None` when the device does not answer.
    pub fn sample(&self, now: Instant) -> Option<BatterySample> {
        let mut state = self.state.lock();
        if !state.reachable {
            return None;
        }
        if let Some((start, due)) = state.pending {
            if now >= due {
                state.running = start && !state.fault;
                state.pending = None;
            }
        }
        Some(BatterySample {
            soc: state.soc,
            voltage: if state.running { 750 } else { 0 },
            current: 0,
            running: state.running,
            fault: state.fault,
        })
    }

    /// Simulate a BMS fault. Opens the contactors.
    pub fn inject_fault(&self, fault: bool) {
        let mut state = self.state.lock();
        state.fault = fault;
        if fault {
            state.running = false;
        }
    }

    /// Simulate a cable break.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }
}

// ─── Component ──────────────────────────────────────────────────────

/// Channel side of the battery.
#[derive(Debug)]
pub struct BatteryDevice {
    channels: ChannelSet,
}

impl BatteryDevice {
    fn flag(&self, id: &str) -> bool {
        self.channels
            .channel(id)
            .ok()
            .and_then(|ch| ch.value())
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

impl Component for BatteryDevice {
    fn id(&self) -> &str {
        self.channels.component_id()
    }

    fn channels(&self) -> &ChannelSet {
        &self.channels
    }
}

impl StartStopDevice for BatteryDevice {
    fn id(&self) -> &str {
        self.channels.component_id()
    }

    fn is_started(&self) -> bool {
        let running = self.channels.channel(RUNNING).ok().and_then(|ch| ch.value());
        running == Some(Value::Bool(true))
    }

    fn is_stopped(&self) -> bool {
        let running = self.channels.channel(RUNNING).ok().and_then(|ch| ch.value());
        running == Some(Value::Bool(false))
    }

    fn has_faults(&self) -> bool {
        self.flag(HARDWARE_FAULT)
    }

    fn start(&self) -> Result<(), ChannelError> {
        self.channels.write_channel(START_STOP)?.set_next_write_value(true)
    }

    fn stop(&self) -> Result<(), ChannelError> {
        self.channels.write_channel(START_STOP)?.set_next_write_value(false)
    }

    fn set_fault(&self, fault: SequenceFault, active: bool) -> Result<(), ChannelError> {
        let id = match fault {
            SequenceFault::MaxStartAttempts => MAX_START_ATTEMPTS,
            SequenceFault::MaxStopAttempts => MAX_STOP_ATTEMPTS,
        };
        self.channels.channel(id)?.set_next_value(active)
    }
}

/// Battery component: channels, sequencer and hardware model.
pub struct SimulatedBattery {
    device: Arc<BatteryDevice>,
    hardware: Arc<BatteryHardware>,
    sequencer: StartStopSequencer<BatteryDevice>,
}

impl SimulatedBattery {
    pub fn new(config: &SimulatedBatteryConfig, services: &ServiceContext) -> Self {
        let device = Arc::new(BatteryDevice {
            channels: ChannelSet::from_table(config.id.clone(), CHANNELS, services),
        });
        let hardware = Arc::new(BatteryHardware::new(
            format!("SIM-{}", config.id),
            config.initial_soc,
            Duration::from_millis(config.response_delay_ms),
        ));
        let sequencer =
            StartStopSequencer::new(device.clone(), config.start_stop, config.retry_policy());
        info!(battery = %config.id, target = ?config.start_stop, "simulated battery created");
        Self {
            device,
            hardware,
            sequencer,
        }
    }

    pub fn device(&self) -> Arc<BatteryDevice> {
        self.device.clone()
    }

    pub fn hardware(&self) -> Arc<BatteryHardware> {
        self.hardware.clone()
    }

    pub fn state(&self) -> StartStopState {
        self.sequencer.state()
    }

    pub fn set_target(&mut self, target: StartStopConfig) {
        self.sequencer.set_target(target);
    }

    /// Communication tasks for the bridge this battery is attached to.
    pub fn bridge_tasks(&self) -> Vec<Arc<dyn BridgeTask>> {
        let link = || Link {
            device: self.device.clone(),
            hardware: self.hardware.clone(),
        };
        let tasks: [Arc<dyn BridgeTask>; 4] = [
            Arc::new(ApplyStartStop(link())),
            Arc::new(ReadStatus(link())),
            Arc::new(ReadIdentification(link())),
            Arc::new(ReadTemperature(link())),
        ];
        tasks.into()
    }

    fn step(&mut self, now: Instant) -> Result<(), ChannelError> {
        let channels = self.device.channels();
        match self.sequencer.run(now) {
            Ok(state) => {
                channels.channel(RUN_FAILED)?.set_next_value(false)?;
                channels.channel(STATE_MACHINE)?.set_next_value(state.code())?;
            }
            Err(e) => {
                error!(battery = self.device.channels.component_id(), state = %self.sequencer.state(), error = %e, "state machine failed");
                channels.channel(RUN_FAILED)?.set_next_value(true)?;
                channels
                    .channel(STATE_MACHINE)?
                    .set_next_value(self.sequencer.state().code())?;
            }
        }
        Ok(())
    }
}

impl PhaseListener for SimulatedBattery {
    fn name(&self) -> &str {
        self.device.channels.component_id()
    }

    fn phases(&self) -> PhaseMask {
        PhaseMask::AFTER_PROCESS_IMAGE
    }

    fn on_phase(&mut self, phase: Phase, ctx: &CycleContext) -> Result<(), PhaseError> {
        if phase == Phase::AfterProcessImage {
            self.step(ctx.now)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SimulatedBattery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedBattery")
            .field("id", &self.device.channels.component_id())
            .field("sequencer", &self.sequencer)
            .finish()
    }
}

// ─── Bridge tasks ───────────────────────────────────────────────────

struct Link {
    device: Arc<BatteryDevice>,
    hardware: Arc<BatteryHardware>,
}

impl Link {
    fn set(&self, id: &str, value: impl Into<Value>) -> Result<(), BridgeError> {
        Ok(self.device.channels.channel(id)?.set_next_value(value)?)
    }

    fn unreachable(&self, task: &str) -> BridgeError {
        BridgeError::Communication {
            task: format!("{}/{task}", self.device.channels.component_id()),
            reason: "no response".to_string(),
        }
    }
}

/// Forward the captured start/stop command to the hardware.
struct ApplyStartStop(Link);

impl ManagedTask for ApplyStartStop {
    fn priority(&self) -> Priority {
        Priority::High
    }

    fn name(&self) -> &str {
        "apply-start-stop"
    }
}

impl BridgeTask for ApplyStartStop {
    fn execute(&self, now: Instant) -> Result<(), BridgeError> {
        let channel = self.0.device.channels.write_channel(START_STOP)?;
        let Some(command) = channel.take_shadow() else {
            return Ok(());
        };
        if let Some(start) = command.value.as_ref().and_then(Value::as_bool) {
            debug!(battery = self.0.device.channels.component_id(), start, "start/stop command sent");
            self.0.hardware.command(start, now);
        }
        Ok(())
    }
}

struct ReadStatus(Link);

impl ManagedTask for ReadStatus {
    fn priority(&self) -> Priority {
        Priority::High
    }

    fn name(&self) -> &str {
        "read-status"
    }
}

impl BridgeTask for ReadStatus {
    fn execute(&self, now: Instant) -> Result<(), BridgeError> {
        let sample = self
            .0
            .hardware
            .sample(now)
            .ok_or_else(|| self.0.unreachable(self.name()))?;
        self.0.set(SOC, sample.soc)?;
        self.0.set(VOLTAGE, sample.voltage)?;
        self.0.set(CURRENT, sample.current)?;
        self.0.set(RUNNING, sample.running)?;
        self.0.set(HARDWARE_FAULT, sample.fault)
    }
}

struct ReadIdentification(Link);

impl ManagedTask for ReadIdentification {
    fn priority(&self) -> Priority {
        Priority::Once
    }

    fn name(&self) -> &str {
        "read-identification"
    }
}

impl BridgeTask for ReadIdentification {
    fn execute(&self, now: Instant) -> Result<(), BridgeError> {
        if self.0.hardware.sample(now).is_none() {
            return Err(self.0.unreachable(self.name()));
        }
        self.0.set(SERIAL_NUMBER, self.0.hardware.serial.as_str())
    }
}

struct ReadTemperature(Link);

impl ManagedTask for ReadTemperature {
    fn priority(&self) -> Priority {
        Priority::Low
    }

    fn name(&self) -> &str {
        "read-temperature"
    }
}

impl BridgeTask for ReadTemperature {
    fn execute(&self, now: Instant) -> Result<(), BridgeError> {
        let sample = self
            .0
            .hardware
            .sample(now)
            .ok_or_else(|| self.0.unreachable(self.name()))?;
        self.0.set(TEMPERATURE, if sample.running { 28 } else { 22 })
    }
}
