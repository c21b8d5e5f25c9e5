//! Start/stop sequencing shared by every device that can be switched on
//! and off (battery strings, inverters, chargers).
//!
//! ```text
//!             ┌──────────────┐ target START/AUTO ┌────────────┐ started ┌─────────┐
//!  (force) ──►│  UNDEFINED   ├──────────────────►│ GO_RUNNING ├────────►│ RUNNING │
//!             └──┬───────┬───┘                   └─────┬──────┘         └─────────┘
//!     faults     │       │ target STOP                 │ budget exhausted
//!   ┌────────────┘       ▼                             ▼
//!   │            ┌────────────┐ stopped ┌─────────┐   UNDEFINED (+ fault channel)
//!   ▼            │ GO_STOPPED ├────────►│ STOPPED │
//! ERROR          └────────────┘         └─────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use super::retry::{RetryPolicy, RetryStep, RetryTracker};
use super::{State, StateHandler, StateMachine};
use crate::error::{ChannelError, StateMachineError};

/// Operator target for a start/stop device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartStopConfig {
    /// Let the runtime decide. Currently equivalent to `Start`.
    #[default]
    Auto,
    Start,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StartStopState {
    Undefined,
    GoRunning,
    Running,
    GoStopped,
    Stopped,
    /// Left only once the device reports no faults.
    Error,
}

impl StartStopState {
    /// Numeric code published on the state-machine channel.
    pub const fn code(self) -> i64 {
        match self {
            Self::Undefined => -1,
            Self::GoRunning => 10,
            Self::Running => 11,
            Self::GoStopped => 20,
            Self::Stopped => 21,
            Self::Error => 30,
        }
    }
}

impl State for StartStopState {
    fn undefined() -> Self {
        Self::Undefined
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Undefined => "UNDEFINED",
            Self::GoRunning => "GO_RUNNING",
            Self::Running => "RUNNING",
            Self::GoStopped => "GO_STOPPED",
            Self::Stopped => "STOPPED",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for StartStopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Persistent fault raised when a retry budget is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceFault {
    MaxStartAttempts,
    MaxStopAttempts,
}

/// Capability of a device that the sequencer can switch on and off.
///
/// Status checks read the current process image; commands queue write
/// requests and never block.
pub trait StartStopDevice: Send + Sync {
    fn id(&self) -> &str;

    fn is_started(&self) -> bool;

    fn is_stopped(&self) -> bool;

    fn has_faults(&self) -> bool;

    fn start(&self) -> Result<(), ChannelError>;

    fn stop(&self) -> Result<(), ChannelError>;

    fn set_fault(&self, fault: SequenceFault, active: bool) -> Result<(), ChannelError>;
}

/// Per-step context of the start/stop handlers.
pub struct StartStopContext<D: ?Sized> {
    pub device: Arc<D>,
    pub target: StartStopConfig,
    pub now: Instant,
}

struct Undefined<D: ?Sized>(PhantomData<fn(&D)>);

impl<D: StartStopDevice + ?Sized> StateHandler<StartStopState, StartStopContext<D>>
    for Undefined<D>
{
    fn run_and_get_next_state(
        &mut self,
        ctx: &mut StartStopContext<D>,
    ) -> Result<StartStopState, StateMachineError> {
        if ctx.device.has_faults() {
            return Ok(StartStopState::Error);
        }
        Ok(match ctx.target {
            StartStopConfig::Auto | StartStopConfig::Start => StartStopState::GoRunning,
            StartStopConfig::Stop => StartStopState::GoStopped,
        })
    }
}

/// GO_RUNNING and GO_STOPPED differ only in direction.
#[derive(Clone, Copy)]
enum Direction {
    Start,
    Stop,
}

struct Going<D: ?Sized> {
    direction: Direction,
    policy: RetryPolicy,
    tracker: RetryTracker,
    _device: PhantomData<fn(&D)>,
}

impl<D: ?Sized> Going<D> {
    fn new(direction: Direction, policy: RetryPolicy) -> Self {
        Self {
            direction,
            policy,
            tracker: RetryTracker::new(),
            _device: PhantomData,
        }
    }
}

impl<D: StartStopDevice + ?Sized> StateHandler<StartStopState, StartStopContext<D>> for Going<D> {
    fn on_entry(&mut self, _ctx: &mut StartStopContext<D>) -> Result<(), StateMachineError> {
        self.tracker.reset();
        Ok(())
    }

    fn run_and_get_next_state(
        &mut self,
        ctx: &mut StartStopContext<D>,
    ) -> Result<StartStopState, StateMachineError> {
        let device = &ctx.device;
        if device.has_faults() {
            return Ok(StartStopState::Error);
        }

        let (state, done, fault, achieved) = match self.direction {
            Direction::Start => (
                StartStopState::GoRunning,
                StartStopState::Running,
                SequenceFault::MaxStartAttempts,
                device.is_started(),
            ),
            Direction::Stop => (
                StartStopState::GoStopped,
                StartStopState::Stopped,
                SequenceFault::MaxStopAttempts,
                device.is_stopped(),
            ),
        };

        match self.tracker.step(&self.policy, ctx.now, achieved) {
            RetryStep::Achieved => {
                device.set_fault(fault, false)?;
                Ok(done)
            }
            RetryStep::Wait => Ok(state),
            RetryStep::GiveUp => {
                warn!(
                    device = device.id(),
                    state = state.name(),
                    attempts = self.tracker.attempts(),
                    "retry budget exhausted"
                );
                device.set_fault(fault, true)?;
                Ok(StartStopState::Undefined)
            }
            RetryStep::Attempt(attempt) => {
                info!(device = device.id(), state = state.name(), attempt, "issuing command");
                match self.direction {
                    Direction::Start => device.start()?,
                    Direction::Stop => device.stop()?,
                }
                Ok(state)
            }
        }
    }
}

/// RUNNING and STOPPED hold as long as the device agrees.
struct Holding<D: ?Sized> {
    direction: Direction,
    _device: PhantomData<fn(&D)>,
}

impl<D: StartStopDevice + ?Sized> StateHandler<StartStopState, StartStopContext<D>>
    for Holding<D>
{
    fn run_and_get_next_state(
        &mut self,
        ctx: &mut StartStopContext<D>,
    ) -> Result<StartStopState, StateMachineError> {
        if ctx.device.has_faults() {
            return Ok(StartStopState::Error);
        }
        Ok(match self.direction {
            Direction::Start if ctx.device.is_started() => StartStopState::Running,
            Direction::Stop if ctx.device.is_stopped() => StartStopState::Stopped,
            _ => StartStopState::Undefined,
        })
    }
}

struct Faulted<D: ?Sized>(PhantomData<fn(&D)>);

impl<D: StartStopDevice + ?Sized> StateHandler<StartStopState, StartStopContext<D>>
    for Faulted<D>
{
    fn on_entry(&mut self, ctx: &mut StartStopContext<D>) -> Result<(), StateMachineError> {
        warn!(device = ctx.device.id(), "device fault, stopping");
        ctx.device.stop()?;
        Ok(())
    }

    fn run_and_get_next_state(
        &mut self,
        ctx: &mut StartStopContext<D>,
    ) -> Result<StartStopState, StateMachineError> {
        Ok(if ctx.device.has_faults() {
            StartStopState::Error
        } else {
            info!(device = ctx.device.id(), "faults cleared");
            StartStopState::Undefined
        })
    }
}

/// Start/stop state machine bound to one device.
pub struct StartStopSequencer<D: StartStopDevice + ?Sized + 'static> {
    machine: StateMachine<StartStopState, StartStopContext<D>>,
    device: Arc<D>,
    target: StartStopConfig,
}

impl<D: StartStopDevice + ?Sized + 'static> StartStopSequencer<D> {
    pub fn new(device: Arc<D>, target: StartStopConfig, policy: RetryPolicy) -> Self {
        let machine = StateMachine::new()
            .with_handler(StartStopState::Undefined, Undefined(PhantomData))
            .with_handler(
                StartStopState::GoRunning,
                Going::new(Direction::Start, policy),
            )
            .with_handler(
                StartStopState::Running,
                Holding {
                    direction: Direction::Start,
                    _device: PhantomData,
                },
            )
            .with_handler(
                StartStopState::GoStopped,
                Going::new(Direction::Stop, policy),
            )
            .with_handler(
                StartStopState::Stopped,
                Holding {
                    direction: Direction::Stop,
                    _device: PhantomData,
                },
            )
            .with_handler(StartStopState::Error, Faulted(PhantomData));
        Self {
            machine,
            device,
            target,
        }
    }

    #[inline]
    pub fn state(&self) -> StartStopState {
        self.machine.current_state()
    }

    #[inline]
    pub fn target(&self) -> StartStopConfig {
        self.target
    }

    /// Change the operator target. A change restarts the sequence from
    /// UNDEFINED on the next step.
    pub fn set_target(&mut self, target: StartStopConfig) {
        if target != self.target {
            info!(device = self.device.id(), from = ?self.target, to = ?target, "start/stop target changed");
            self.target = target;
            self.machine.force_next_state(StartStopState::Undefined);
        }
    }

    /// Run one step with a freshly built context.
    pub fn run(&mut self, now: Instant) -> Result<StartStopState, StateMachineError> {
        let mut ctx = StartStopContext {
            device: self.device.clone(),
            target: self.target,
            now,
        };
        self.machine.run(&mut ctx)
    }
}

impl<D: StartStopDevice + ?Sized + 'static> fmt::Debug for StartStopSequencer<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartStopSequencer")
            .field("device", &self.device.id())
            .field("state", &self.state())
            .field("target", &self.target)
            .finish()
    }
}
