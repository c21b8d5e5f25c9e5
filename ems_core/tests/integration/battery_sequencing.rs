//! Integration test: battery start sequencing through the whole runtime.
//!
//! Engine tick → sequencer in AFTER_PROCESS_IMAGE → write channel →
//! shadow copy → bridge worker → hardware model → read task → next tick.

use std::sync::Arc;
use std::time::Duration;

use ems_common::watchdog::NoopWatchdog;
use ems_core::channel::Value;
use ems_core::clock::ManualClock;
use ems_core::component::Component;
use ems_core::component::ServiceContext;
use ems_core::component::battery::{MAX_START_ATTEMPTS, RUNNING, STATE_MACHINE};
use ems_core::config::load_config_from_str;
use ems_core::runtime::{Runtime, build_with};
use ems_core::state::StartStopState;

const WAIT: Duration = Duration::from_secs(5);

fn config(response_delay_ms: u64) -> String {
    format!(
        r#"
[shared]
service_name = "ems-it"

[channels]
stale_after_ms = 60000

[[battery]]
id = "battery0"
start_stop = "start"
retry_interval_s = 10
max_attempts = 2
response_delay_ms = {response_delay_ms}
"#
    )
}

fn runtime(response_delay_ms: u64) -> (Arc<ManualClock>, Runtime) {
    let config = load_config_from_str(&config(response_delay_ms)).unwrap();
    let clock = Arc::new(ManualClock::new());
    let services = ServiceContext::new(clock.clone(), Duration::from_millis(60_000));
    let runtime = build_with(&config, &services, Box::new(NoopWatchdog)).unwrap();
    (clock, runtime)
}

fn tick(runtime: &mut Runtime) {
    runtime.engine_mut().tick();
    assert!(runtime.bridge().wait_idle(WAIT), "bridge worker stuck");
}

fn published_state(runtime: &Runtime) -> Option<Value> {
    let device = &runtime.battery("battery0").unwrap().device;
    device.channels().channel(STATE_MACHINE).unwrap().next_value()
}

fn code(state: StartStopState) -> Option<Value> {
    Some(Value::Int(state.code()))
}

#[test]
fn battery_starts_after_timeout() {
    let (clock, mut rt) = runtime(0);

    tick(&mut rt);
    assert_eq!(published_state(&rt), code(StartStopState::GoRunning));
    assert!(!rt.battery("battery0").unwrap().hardware.is_running());

    // Start command issued and executed by the bridge in the same tick.
    tick(&mut rt);
    assert_eq!(published_state(&rt), code(StartStopState::GoRunning));
    assert!(rt.battery("battery0").unwrap().hardware.is_running());

    clock.advance(Duration::from_secs(11));
    tick(&mut rt);
    assert_eq!(published_state(&rt), code(StartStopState::Running));

    let device = &rt.battery("battery0").unwrap().device;
    assert_eq!(
        device.channels().channel(RUNNING).unwrap().value(),
        Some(Value::Bool(true))
    );
}

#[test]
fn lost_communication_resequences_battery() {
    let (clock, mut rt) = runtime(0);
    for _ in 0..3 {
        tick(&mut rt);
    }
    assert_eq!(published_state(&rt), code(StartStopState::Running));

    let parts = rt.battery("battery0").unwrap().clone();
    parts.hardware.set_reachable(false);
    clock.advance(Duration::from_secs(61));
    tick(&mut rt);

    // No fresh reading within the window: the running flag is undefined.
    assert_eq!(parts.device.channels().channel(RUNNING).unwrap().value(), None);
    assert_eq!(published_state(&rt), code(StartStopState::Undefined));
    assert!(rt.bridge().failed_tasks() > 0);
}

#[test]
fn unresponsive_hardware_raises_start_fault() {
    // Contactors take an hour to follow a command.
    let (clock, mut rt) = runtime(3_600_000);
    let parts = rt.battery("battery0").unwrap().clone();

    tick(&mut rt);
    tick(&mut rt); // attempt 1
    clock.advance(Duration::from_secs(10));
    tick(&mut rt); // attempt 2
    clock.advance(Duration::from_secs(10));
    tick(&mut rt); // budget exhausted
    assert_eq!(published_state(&rt), code(StartStopState::Undefined));
    assert!(!parts.hardware.is_running());

    tick(&mut rt);
    let fault = parts.device.channels().channel(MAX_START_ATTEMPTS).unwrap();
    assert_eq!(fault.value(), Some(Value::Bool(true)));
    // The sequence starts over with a fresh budget.
    assert_eq!(published_state(&rt), code(StartStopState::GoRunning));
}
