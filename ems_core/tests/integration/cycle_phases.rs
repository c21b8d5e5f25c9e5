//! Integration test: process image consistency and data flow per tick.
//!
//! Producers write next values from other threads at any time; controllers
//! must see one frozen snapshot for the whole tick and fresh data only
//! after the next promotion.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use ems_common::watchdog::NoopWatchdog;
use ems_core::channel::{ChannelDoc, ChannelSet, Value, ValueType};
use ems_core::clock::ManualClock;
use ems_core::component::battery::SOC;
use ems_core::component::{Component, ServiceContext};
use ems_core::config::load_config_from_str;
use ems_core::cycle::{CYCLE_COUNT, Controller, CycleContext, CycleEngine};
use ems_core::error::ControllerError;
use ems_core::runtime::build_with;

const ACTIVE_POWER: &str = "ActivePower";

static METER_CHANNELS: &[ChannelDoc] = &[ChannelDoc::new(ACTIVE_POWER, ValueType::Integer)];

struct Meter {
    channels: ChannelSet,
}

impl Component for Meter {
    fn id(&self) -> &str {
        self.channels.component_id()
    }

    fn channels(&self) -> &ChannelSet {
        &self.channels
    }
}

impl Meter {
    fn power(&self) -> Option<Value> {
        self.channels.channel(ACTIVE_POWER).ok().and_then(|ch| ch.value())
    }
}

/// Reads the same channel twice, with a pause in between.
struct DoubleRead {
    meter: Arc<Meter>,
    torn: Arc<AtomicU32>,
    seen: Arc<Mutex<Vec<Option<Value>>>>,
}

impl Controller for DoubleRead {
    fn id(&self) -> &str {
        "double-read"
    }

    fn run(&mut self, _ctx: &CycleContext) -> Result<(), ControllerError> {
        let first = self.meter.power();
        thread::sleep(Duration::from_millis(2));
        let second = self.meter.power();
        if first != second {
            self.torn.fetch_add(1, Ordering::SeqCst);
        }
        self.seen.lock().push(first);
        Ok(())
    }
}

#[test]
fn controllers_see_a_frozen_snapshot() {
    let services = ServiceContext::default();
    let meter = Arc::new(Meter {
        channels: ChannelSet::from_table("meter0", METER_CHANNELS, &services),
    });
    let mut engine = CycleEngine::new(Duration::from_millis(50), &services);
    engine.register_component(meter.as_ref());

    let torn = Arc::new(AtomicU32::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    engine.add_controller(Box::new(DoubleRead {
        meter: meter.clone(),
        torn: torn.clone(),
        seen: seen.clone(),
    }));

    let stop = Arc::new(AtomicBool::new(false));
    let producer = {
        let meter = meter.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            let channel = meter.channels.channel(ACTIVE_POWER).unwrap();
            let mut watts = 0i64;
            while !stop.load(Ordering::Relaxed) {
                channel.set_next_value(watts).unwrap();
                watts += 1;
                thread::yield_now();
            }
        })
    };

    for _ in 0..20 {
        engine.tick();
    }
    stop.store(true, Ordering::Relaxed);
    producer.join().unwrap();

    assert_eq!(torn.load(Ordering::SeqCst), 0);
    let mut distinct = seen.lock().clone();
    distinct.dedup();
    assert!(distinct.len() > 1, "producer values never reached the image");
}

#[test]
fn next_values_become_visible_only_after_promotion() {
    let services = ServiceContext::default();
    let meter = Meter {
        channels: ChannelSet::from_table("meter0", METER_CHANNELS, &services),
    };
    let mut engine = CycleEngine::new(Duration::from_millis(50), &services);
    engine.register_component(&meter);

    meter
        .channels
        .channel(ACTIVE_POWER)
        .unwrap()
        .set_next_value(4200)
        .unwrap();
    assert_eq!(meter.power(), None);

    engine.tick();
    assert_eq!(meter.power(), Some(Value::Int(4200)));

    // The engine's own counter lags one tick behind.
    engine.tick();
    let count = engine.channels().channel(CYCLE_COUNT).unwrap().value();
    assert_eq!(count.and_then(|v| v.as_i64()), Some(1));
}

/// Records the battery state of charge seen each tick.
struct SocProbe {
    device: Arc<ems_core::component::battery::BatteryDevice>,
    seen: Arc<Mutex<Vec<Option<Value>>>>,
}

impl Controller for SocProbe {
    fn id(&self) -> &str {
        "soc-probe"
    }

    fn run(&mut self, _ctx: &CycleContext) -> Result<(), ControllerError> {
        let soc = self.device.channels().channel(SOC)?.value();
        self.seen.lock().push(soc);
        Ok(())
    }
}

#[test]
fn bridge_readings_reach_controllers_one_tick_later() {
    let config = load_config_from_str(
        r#"
[shared]
service_name = "ems-it"

[[battery]]
id = "battery0"
initial_soc = 73
"#,
    )
    .unwrap();
    let clock = Arc::new(ManualClock::new());
    let services = ServiceContext::new(clock, Duration::from_secs(60));
    let mut runtime = build_with(&config, &services, Box::new(NoopWatchdog)).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let device = runtime.battery("battery0").unwrap().device.clone();
    runtime.engine_mut().add_controller(Box::new(SocProbe {
        device,
        seen: seen.clone(),
    }));

    for _ in 0..2 {
        runtime.engine_mut().tick();
        assert!(runtime.bridge().wait_idle(Duration::from_secs(5)));
    }
    assert_eq!(*seen.lock(), vec![None, Some(Value::Int(73))]);
}
