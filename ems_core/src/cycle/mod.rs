//! Scan-cycle engine.
//!
//! Every period the engine runs one tick with strictly ordered phases:
//!
//! | # | Step                 | Work                                         |
//! |---|----------------------|----------------------------------------------|
//! | 1 | BEFORE_PROCESS_IMAGE | listeners                                    |
//! | 2 | promote              | `next_value → value` on every channel        |
//! | 3 | AFTER_PROCESS_IMAGE  | listeners (state machines of components)     |
//! | 4 | BEFORE_CONTROLLERS   | listeners                                    |
//! | 5 | controllers          | descending priority, registration order      |
//! | 6 | AFTER_CONTROLLERS    | listeners                                    |
//! | 7 | BEFORE_WRITE         | listeners                                    |
//! | 8 | EXECUTE_WRITE        | shadow copy of all write channels, bridges   |
//! | 9 | AFTER_WRITE          | listeners, then write bounds cleared         |
//!
//! A failing or panicking controller or listener is logged with its id and
//! skipped; the tick always completes. The supervisor watchdog is notified
//! once per tick.

pub mod controller;
pub mod process_image;
pub mod rt;

use bitflags::bitflags;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use ems_common::consts::CYCLE_COMPONENT_ID;
use ems_common::types::Unit;
use ems_common::watchdog::{Health, LivenessReport, NoopWatchdog, Watchdog};

use crate::channel::{ChannelDoc, ChannelSet, ValueType};
use crate::clock::Clock;
use crate::component::{Component, ServiceContext};
use crate::error::{CycleError, PhaseError};

pub use controller::{Controller, ControllerStats};
pub use process_image::ProcessImage;
pub use rt::{RtParams, rt_setup};

// ─── Phases ─────────────────────────────────────────────────────────

/// Notification points of a tick, in firing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    BeforeProcessImage,
    AfterProcessImage,
    BeforeControllers,
    AfterControllers,
    BeforeWrite,
    ExecuteWrite,
    AfterWrite,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::BeforeProcessImage,
        Phase::AfterProcessImage,
        Phase::BeforeControllers,
        Phase::AfterControllers,
        Phase::BeforeWrite,
        Phase::ExecuteWrite,
        Phase::AfterWrite,
    ];

    pub const fn mask(self) -> PhaseMask {
        match self {
            Self::BeforeProcessImage => PhaseMask::BEFORE_PROCESS_IMAGE,
            Self::AfterProcessImage => PhaseMask::AFTER_PROCESS_IMAGE,
            Self::BeforeControllers => PhaseMask::BEFORE_CONTROLLERS,
            Self::AfterControllers => PhaseMask::AFTER_CONTROLLERS,
            Self::BeforeWrite => PhaseMask::BEFORE_WRITE,
            Self::ExecuteWrite => PhaseMask::EXECUTE_WRITE,
            Self::AfterWrite => PhaseMask::AFTER_WRITE,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::BeforeProcessImage => "BEFORE_PROCESS_IMAGE",
            Self::AfterProcessImage => "AFTER_PROCESS_IMAGE",
            Self::BeforeControllers => "BEFORE_CONTROLLERS",
            Self::AfterControllers => "AFTER_CONTROLLERS",
            Self::BeforeWrite => "BEFORE_WRITE",
            Self::ExecuteWrite => "EXECUTE_WRITE",
            Self::AfterWrite => "AFTER_WRITE",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Set of phases a listener subscribes to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PhaseMask: u8 {
        const BEFORE_PROCESS_IMAGE = 1 << 0;
        const AFTER_PROCESS_IMAGE  = 1 << 1;
        const BEFORE_CONTROLLERS   = 1 << 2;
        const AFTER_CONTROLLERS    = 1 << 3;
        const BEFORE_WRITE         = 1 << 4;
        const EXECUTE_WRITE        = 1 << 5;
        const AFTER_WRITE          = 1 << 6;
    }
}

/// Per-tick data handed to controllers and listeners.
#[derive(Debug, Clone, Copy)]
pub struct CycleContext {
    /// Tick number, starting at 1.
    pub cycle: u64,
    /// Clock reading at tick start.
    pub now: Instant,
}

/// Collaborator notified synchronously at the phases in [`phases`](Self::phases).
pub trait PhaseListener: Send {
    fn name(&self) -> &str;

    fn phases(&self) -> PhaseMask;

    fn on_phase(&mut self, phase: Phase, ctx: &CycleContext) -> Result<(), PhaseError>;
}

// ─── Statistics ─────────────────────────────────────────────────────

/// Tick timing statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleStats {
    pub cycle_count: u64,
    pub overruns: u64,
    pub last: Duration,
    pub max: Duration,
    pub total: Duration,
    /// Controller and listener failures, including panics.
    pub failures: u64,
}

impl CycleStats {
    fn record(&mut self, duration: Duration) {
        self.cycle_count += 1;
        self.last = duration;
        self.max = self.max.max(duration);
        self.total += duration;
    }

    pub fn average(&self) -> Duration {
        if self.cycle_count == 0 {
            Duration::ZERO
        } else {
            self.total.div_f64(self.cycle_count as f64)
        }
    }

    pub fn health(&self) -> Health {
        Health::from_overruns(self.overruns, self.cycle_count)
    }
}

// ─── Engine channels ────────────────────────────────────────────────

pub const MEASURED_CYCLE_TIME: &str = "MeasuredCycleTime";
pub const CYCLE_COUNT: &str = "CycleCount";
pub const CYCLE_OVERRUNS: &str = "CycleOverruns";

static CYCLE_CHANNELS: &[ChannelDoc] = &[
    ChannelDoc::new(MEASURED_CYCLE_TIME, ValueType::Long)
        .unit(Unit::Millisecond)
        .text("Duration of the previous tick"),
    ChannelDoc::new(CYCLE_COUNT, ValueType::Long),
    ChannelDoc::new(CYCLE_OVERRUNS, ValueType::Long),
];

/// The engine's own component `_cycle`.
#[derive(Debug)]
struct CycleComponent {
    channels: ChannelSet,
}

impl Component for CycleComponent {
    fn id(&self) -> &str {
        CYCLE_COMPONENT_ID
    }

    fn channels(&self) -> &ChannelSet {
        &self.channels
    }
}

// ─── Engine ─────────────────────────────────────────────────────────

struct ControllerSlot {
    controller: Box<dyn Controller>,
    stats: ControllerStats,
}

struct ListenerSlot {
    mask: PhaseMask,
    listener: Box<dyn PhaseListener>,
}

/// Fixed-period scan-cycle engine.
pub struct CycleEngine {
    period: Duration,
    clock: Arc<dyn Clock>,
    image: ProcessImage,
    controllers: Vec<ControllerSlot>,
    listeners: Vec<ListenerSlot>,
    watchdog: Box<dyn Watchdog>,
    report: LivenessReport,
    stats: CycleStats,
    own: Arc<CycleComponent>,
    running: Arc<AtomicBool>,
}

impl CycleEngine {
    pub fn new(period: Duration, services: &ServiceContext) -> Self {
        let own = Arc::new(CycleComponent {
            channels: ChannelSet::from_table(CYCLE_COMPONENT_ID, CYCLE_CHANNELS, services),
        });
        let mut image = ProcessImage::new();
        image.register(own.channels());
        Self {
            period,
            clock: services.clock.clone(),
            image,
            controllers: Vec::new(),
            listeners: Vec::new(),
            watchdog: Box::new(NoopWatchdog),
            report: LivenessReport::default(),
            stats: CycleStats::default(),
            own,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Supervisor to notify once per tick.
    pub fn with_watchdog(mut self, service_name: &str, watchdog: Box<dyn Watchdog>) -> Self {
        self.report.service_name = service_name.to_string();
        self.watchdog = watchdog;
        self
    }

    #[inline]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Add a component's channels to the process image.
    pub fn register_component(&mut self, component: &dyn Component) {
        debug!(component = component.id(), channels = component.channels().len(), "component registered");
        self.image.register(component.channels());
    }

    pub fn unregister_component(&mut self, component_id: &str) {
        self.image.unregister(component_id);
    }

    pub fn add_controller(&mut self, controller: Box<dyn Controller>) {
        debug!(controller = controller.id(), priority = controller.priority(), "controller added");
        self.controllers.push(ControllerSlot {
            controller,
            stats: ControllerStats::new(),
        });
    }

    /// Subscribe a listener. Listeners of one phase run in subscription order.
    pub fn subscribe(&mut self, listener: Box<dyn PhaseListener>) {
        let mask = listener.phases();
        debug!(listener = listener.name(), phases = ?mask, "phase listener subscribed");
        self.listeners.push(ListenerSlot { mask, listener });
    }

    /// The engine's own channels (`_cycle`).
    pub fn channels(&self) -> &ChannelSet {
        self.own.channels()
    }

    pub fn process_image(&self) -> &ProcessImage {
        &self.image
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    pub fn controller_stats(&self, id: &str) -> Option<&ControllerStats> {
        self.controllers
            .iter()
            .find(|slot| slot.controller.id() == id)
            .map(|slot| &slot.stats)
    }

    /// Flag that keeps [`run`](Self::run) looping. Clear it to stop after
    /// the current tick.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Execute one complete tick. Never fails; every error is logged.
    pub fn tick(&mut self) -> Duration {
        let started = self.clock.now();
        let ctx = CycleContext {
            cycle: self.stats.cycle_count + 1,
            now: started,
        };

        self.fire(Phase::BeforeProcessImage, &ctx);
        let changed = self.image.promote(started);
        self.fire(Phase::AfterProcessImage, &ctx);

        self.fire(Phase::BeforeControllers, &ctx);
        self.run_controllers(&ctx);
        self.fire(Phase::AfterControllers, &ctx);

        self.fire(Phase::BeforeWrite, &ctx);
        let commands = self.image.shadow_copy_all();
        self.fire(Phase::ExecuteWrite, &ctx);

        self.fire(Phase::AfterWrite, &ctx);
        self.image.clear_constraints();

        let elapsed = self.clock.now().saturating_duration_since(started);
        self.stats.record(elapsed);
        if elapsed > self.period {
            self.stats.overruns += 1;
            let overruns = self.stats.overruns;
            if overruns <= 10 || overruns % 1000 == 0 {
                warn!(
                    overrun = overruns,
                    took_ms = elapsed.as_secs_f64() * 1e3,
                    period_ms = self.period.as_millis() as u64,
                    "tick overran its period"
                );
            }
        }
        debug!(cycle = ctx.cycle, changed, commands, took_us = elapsed.as_micros() as u64, "tick complete");

        self.publish_own(elapsed);
        self.notify_watchdog();
        elapsed
    }

    /// Tick at the configured period until the running flag is cleared or
    /// `max_cycles` ticks have run. A slow tick delays the next one.
    pub fn run(&mut self, max_cycles: Option<u64>) -> Result<CycleStats, CycleError> {
        self.watchdog.notify_ready()?;
        info!(
            period_ms = self.period.as_millis() as u64,
            channels = self.image.len(),
            controllers = self.controllers.len(),
            listeners = self.listeners.len(),
            watchdog = self.watchdog.name(),
            "cycle engine started"
        );

        let mut executed = 0u64;
        while self.running.load(Ordering::Acquire) {
            if max_cycles.is_some_and(|max| executed >= max) {
                break;
            }
            let elapsed = self.tick();
            executed += 1;
            if let Some(remaining) = self.period.checked_sub(elapsed) {
                std::thread::sleep(remaining);
            }
        }

        if let Err(e) = self.watchdog.notify_stopping() {
            warn!(watchdog = self.watchdog.name(), error = %e, "stop notification failed");
        }
        info!(
            cycles = self.stats.cycle_count,
            overruns = self.stats.overruns,
            failures = self.stats.failures,
            avg_ms = self.stats.average().as_secs_f64() * 1e3,
            "cycle engine stopped"
        );
        Ok(self.stats.clone())
    }

    fn fire(&mut self, phase: Phase, ctx: &CycleContext) {
        let mask = phase.mask();
        for slot in self.listeners.iter_mut().filter(|s| s.mask.contains(mask)) {
            let listener = &mut slot.listener;
            match catch_unwind(AssertUnwindSafe(|| listener.on_phase(phase, ctx))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.stats.failures += 1;
                    error!(listener = listener.name(), phase = phase.name(), error = %e, "phase listener failed");
                }
                Err(_) => {
                    self.stats.failures += 1;
                    error!(listener = listener.name(), phase = phase.name(), "phase listener panicked");
                }
            }
        }
    }

    fn run_controllers(&mut self, ctx: &CycleContext) {
        // Priorities may change at runtime; stable sort keeps registration
        // order for ties.
        let mut order: Vec<(i32, usize)> = self
            .controllers
            .iter()
            .enumerate()
            .map(|(index, slot)| (slot.controller.priority(), index))
            .collect();
        order.sort_by(|a, b| b.0.cmp(&a.0));

        for (_, index) in order {
            let slot = &mut self.controllers[index];
            let controller = &mut slot.controller;
            let started = self.clock.now();
            let result = catch_unwind(AssertUnwindSafe(|| controller.run(ctx)));
            let took = self.clock.now().saturating_duration_since(started);

            let ok = match result {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    error!(controller = controller.id(), error = %e, "controller failed");
                    false
                }
                Err(_) => {
                    error!(controller = controller.id(), "controller panicked");
                    false
                }
            };
            if !ok {
                self.stats.failures += 1;
            }
            slot.stats.record(took, ok);
        }
    }

    fn publish_own(&self, elapsed: Duration) {
        let set = self.own.channels();
        let values = [
            (MEASURED_CYCLE_TIME, elapsed.as_millis() as i64),
            (CYCLE_COUNT, self.stats.cycle_count as i64),
            (CYCLE_OVERRUNS, self.stats.overruns as i64),
        ];
        for (id, value) in values {
            if let Err(e) = set.channel(id).and_then(|ch| ch.set_next_value(value)) {
                warn!(channel = id, error = %e, "cannot publish cycle channel");
            }
        }
    }

    fn notify_watchdog(&mut self) {
        self.report.cycle_count = self.stats.cycle_count;
        self.report.overruns = self.stats.overruns;
        self.report.last_cycle_ms = self.stats.last.as_secs_f64() * 1e3;
        self.report.max_cycle_ms = self.stats.max.as_secs_f64() * 1e3;
        self.report.health = self.stats.health();
        if let Err(e) = self.watchdog.notify_alive(&self.report) {
            if self.stats.cycle_count <= 10 || self.stats.cycle_count % 1000 == 0 {
                warn!(watchdog = self.watchdog.name(), error = %e, "watchdog notification failed");
            }
        }
    }
}

impl fmt::Debug for CycleEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CycleEngine")
            .field("period", &self.period)
            .field("channels", &self.image.len())
            .field("controllers", &self.controllers.len())
            .field("listeners", &self.listeners.len())
            .field("stats", &self.stats)
            .finish()
    }
}
