//! Integration test: write requests from several controllers.
//!
//! Controllers queue values and bounds, the engine resolves them at the
//! shadow-copy point, EXECUTE_WRITE listeners see the captured command and
//! bounds are gone by the next tick.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ems_common::types::{AccessMode, Unit};
use ems_core::channel::{ChannelDoc, ChannelSet, Value, ValueType, WriteChannel, WriteCommand};
use ems_core::component::{Component, ServiceContext};
use ems_core::cycle::{Controller, CycleContext, CycleEngine, Phase, PhaseListener, PhaseMask};
use ems_core::error::{ChannelError, ControllerError, PhaseError};

const SET_ACTIVE_POWER: &str = "SetActivePower";

static INVERTER_CHANNELS: &[ChannelDoc] = &[ChannelDoc::new(SET_ACTIVE_POWER, ValueType::Integer)
    .unit(Unit::Watt)
    .access(AccessMode::ReadWrite)];

struct Inverter {
    channels: ChannelSet,
}

impl Component for Inverter {
    fn id(&self) -> &str {
        self.channels.component_id()
    }

    fn channels(&self) -> &ChannelSet {
        &self.channels
    }
}

/// Requests a set point and caps it.
struct Limiter {
    id: &'static str,
    priority: i32,
    channel: Arc<WriteChannel>,
    value: Option<i64>,
    max: i64,
    enabled: Arc<AtomicBool>,
}

impl Controller for Limiter {
    fn id(&self) -> &str {
        self.id
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn run(&mut self, _ctx: &CycleContext) -> Result<(), ControllerError> {
        if !self.enabled.load(Ordering::Relaxed) {
            return Ok(());
        }
        if let Some(value) = self.value {
            self.channel.set_next_write_value(value)?;
        }
        self.channel.push_write_max(self.max)?;
        Ok(())
    }
}

/// Records what the write phase sees.
struct Capture {
    channel: Arc<WriteChannel>,
    seen: Arc<Mutex<Vec<Option<WriteCommand>>>>,
}

impl PhaseListener for Capture {
    fn name(&self) -> &str {
        "capture"
    }

    fn phases(&self) -> PhaseMask {
        PhaseMask::EXECUTE_WRITE
    }

    fn on_phase(&mut self, _phase: Phase, _ctx: &CycleContext) -> Result<(), PhaseError> {
        self.seen.lock().push(self.channel.shadow());
        Ok(())
    }
}

struct Fixture {
    engine: CycleEngine,
    channel: Arc<WriteChannel>,
    seen: Arc<Mutex<Vec<Option<WriteCommand>>>>,
}

fn fixture() -> Fixture {
    let services = ServiceContext::default();
    let inverter = Inverter {
        channels: ChannelSet::from_table("inverter0", INVERTER_CHANNELS, &services),
    };
    let channel = inverter.channels.write_channel(SET_ACTIVE_POWER).unwrap().clone();

    let mut engine = CycleEngine::new(Duration::from_millis(100), &services);
    engine.register_component(&inverter);
    let seen = Arc::new(Mutex::new(Vec::new()));
    engine.subscribe(Box::new(Capture {
        channel: channel.clone(),
        seen: seen.clone(),
    }));
    Fixture {
        engine,
        channel,
        seen,
    }
}

fn limiter(
    id: &'static str,
    priority: i32,
    channel: &Arc<WriteChannel>,
    value: Option<i64>,
    max: i64,
) -> (Box<Limiter>, Arc<AtomicBool>) {
    let enabled = Arc::new(AtomicBool::new(true));
    let limiter = Box::new(Limiter {
        id,
        priority,
        channel: channel.clone(),
        value,
        max,
        enabled: enabled.clone(),
    });
    (limiter, enabled)
}

#[test]
fn tightest_bound_wins_and_resets_each_tick() {
    let mut fx = fixture();
    let (first, _) = limiter("grid-limit", 10, &fx.channel, Some(4000), 5000);
    let (second, second_enabled) = limiter("peak-shaving", 5, &fx.channel, None, 3000);
    fx.engine.add_controller(first);
    fx.engine.add_controller(second);

    fx.engine.tick();
    {
        let seen = fx.seen.lock();
        let command = seen[0].as_ref().unwrap();
        assert_eq!(command.max, Some(Value::Int(3000)));
        assert_eq!(command.value, Some(Value::Int(3000)));
    }

    second_enabled.store(false, Ordering::Relaxed);
    fx.engine.tick();
    let seen = fx.seen.lock();
    let command = seen[1].as_ref().unwrap();
    assert_eq!(command.max, Some(Value::Int(5000)));
    assert_eq!(command.value, Some(Value::Int(4000)));
}

#[test]
fn value_above_merged_bound_is_rejected() {
    let mut fx = fixture();
    // Higher priority caps first, so the later request violates the cap.
    let (cap, _) = limiter("cap", 10, &fx.channel, None, 3000);
    let (greedy, _) = limiter("greedy", 0, &fx.channel, Some(6000), 8000);
    fx.engine.add_controller(cap);
    fx.engine.add_controller(greedy);

    fx.engine.tick();

    let stats = fx.engine.controller_stats("greedy").unwrap();
    assert_eq!(stats.failures(), 1);
    assert_eq!(fx.engine.controller_stats("cap").unwrap().failures(), 0);

    let seen = fx.seen.lock();
    let command = seen[0].as_ref().unwrap();
    assert_eq!(command.value, None);
    assert_eq!(command.max, Some(Value::Int(3000)));
}

#[test]
fn write_observers_see_non_empty_commands() {
    let mut fx = fixture();
    let observed = Arc::new(Mutex::new(Vec::new()));
    let sink = observed.clone();
    fx.channel.on_write(move |channel, command| {
        sink.lock()
            .push((channel.address().to_string(), command.value.clone()));
    });
    let (only, enabled) = limiter("only", 0, &fx.channel, Some(1500), 2000);
    fx.engine.add_controller(only);

    fx.engine.tick();
    enabled.store(false, Ordering::Relaxed);
    fx.engine.tick();

    // The idle tick captured an empty command and notified nobody.
    let observed = observed.lock();
    assert_eq!(
        *observed,
        vec![("inverter0/SetActivePower".to_string(), Some(Value::Int(1500)))]
    );
}

#[test]
fn panicking_write_observer_does_not_stop_the_cycle() {
    let mut fx = fixture();
    fx.channel.on_write(|_, _| panic!("observer bug"));
    let (only, _) = limiter("only", 0, &fx.channel, Some(1500), 2000);
    fx.engine.add_controller(only);

    fx.engine.tick();
    fx.engine.tick();

    assert_eq!(fx.engine.stats().cycle_count, 2);
    let seen = fx.seen.lock();
    assert_eq!(seen.len(), 2);
    for command in seen.iter() {
        assert_eq!(command.as_ref().unwrap().value, Some(Value::Int(1500)));
    }
}

#[test]
fn read_only_channels_reject_write_requests() {
    static TABLE: &[ChannelDoc] = &[ChannelDoc::new("ActivePower", ValueType::Integer)];
    let set = ChannelSet::from_table("meter0", TABLE, &ServiceContext::default());
    assert!(matches!(
        set.write_channel("ActivePower"),
        Err(ChannelError::NotWritable { .. })
    ));
}
