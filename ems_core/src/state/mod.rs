//! Generic state machine.
//!
//! One [`StateHandler`] is bound per state. Each [`StateMachine::run`]
//! invokes the handler of the current state with a context built fresh by
//! the owning component, and the returned state becomes current. When a
//! state is freshly entered its `on_entry` hook runs once before the
//! handler, so handlers can reset their own retry bookkeeping.

pub mod retry;
pub mod start_stop;

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use tracing::debug;

use crate::error::StateMachineError;

pub use retry::{RetryPolicy, RetryStep, RetryTracker};
pub use start_stop::{
    SequenceFault, StartStopConfig, StartStopContext, StartStopDevice, StartStopSequencer,
    StartStopState,
};

/// A finite state enum.
pub trait State: Copy + Eq + Hash + Debug + Send + 'static {
    /// Initial state.
    fn undefined() -> Self;

    fn name(&self) -> &'static str;
}

/// Behaviour bound to exactly one state.
pub trait StateHandler<S: State, C>: Send {
    /// Runs once when the machine enters this handler's state.
    fn on_entry(&mut self, _ctx: &mut C) -> Result<(), StateMachineError> {
        Ok(())
    }

    /// One unit of work. Returning the own state means "keep waiting".
    fn run_and_get_next_state(&mut self, ctx: &mut C) -> Result<S, StateMachineError>;
}

pub struct StateMachine<S: State, C> {
    handlers: HashMap<S, Box<dyn StateHandler<S, C>>>,
    current: S,
    entered: bool,
    forced: Option<S>,
}

impl<S: State, C> StateMachine<S, C> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            current: S::undefined(),
            entered: false,
            forced: None,
        }
    }

    /// Bind `handler` to `state`, replacing any previous binding.
    pub fn with_handler(mut self, state: S, handler: impl StateHandler<S, C> + 'static) -> Self {
        self.handlers.insert(state, Box::new(handler));
        self
    }

    #[inline]
    pub fn current_state(&self) -> S {
        self.current
    }

    /// Make the next [`run`](Self::run) start from `state`. Its entry hook
    /// runs again even if it equals the current state.
    pub fn force_next_state(&mut self, state: S) {
        self.forced = Some(state);
    }

    /// Execute one step and return the new current state.
    ///
    /// On error the machine stays in its current state; a failed entry hook
    /// is retried on the next call.
    pub fn run(&mut self, ctx: &mut C) -> Result<S, StateMachineError> {
        if let Some(forced) = self.forced.take() {
            if forced != self.current {
                debug!(from = self.current.name(), to = forced.name(), "state forced");
            }
            self.current = forced;
            self.entered = false;
        }

        let handler = self
            .handlers
            .get_mut(&self.current)
            .ok_or(StateMachineError::NoHandler(self.current.name()))?;

        if !self.entered {
            handler.on_entry(ctx)?;
            self.entered = true;
        }

        let next = handler.run_and_get_next_state(ctx)?;
        if next != self.current {
            debug!(from = self.current.name(), to = next.name(), "state transition");
            self.current = next;
            self.entered = false;
        }
        Ok(next)
    }
}

impl<S: State, C> Default for StateMachine<S, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: State, C> Debug for StateMachine<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("current", &self.current)
            .field("forced", &self.forced)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Door {
        Undefined,
        Opening,
        Open,
    }

    impl State for Door {
        fn undefined() -> Self {
            Self::Undefined
        }

        fn name(&self) -> &'static str {
            match self {
                Self::Undefined => "UNDEFINED",
                Self::Opening => "OPENING",
                Self::Open => "OPEN",
            }
        }
    }

    #[derive(Default)]
    struct Ctx {
        sensor_open: bool,
        entries: u32,
        runs: u32,
    }

    struct ToOpening;

    impl StateHandler<Door, Ctx> for ToOpening {
        fn run_and_get_next_state(&mut self, _ctx: &mut Ctx) -> Result<Door, StateMachineError> {
            Ok(Door::Opening)
        }
    }

    struct Opening;

    impl StateHandler<Door, Ctx> for Opening {
        fn on_entry(&mut self, ctx: &mut Ctx) -> Result<(), StateMachineError> {
            ctx.entries += 1;
            Ok(())
        }

        fn run_and_get_next_state(&mut self, ctx: &mut Ctx) -> Result<Door, StateMachineError> {
            ctx.runs += 1;
            Ok(if ctx.sensor_open { Door::Open } else { Door::Opening })
        }
    }

    struct Failing;

    impl StateHandler<Door, Ctx> for Failing {
        fn run_and_get_next_state(&mut self, _ctx: &mut Ctx) -> Result<Door, StateMachineError> {
            Err(StateMachineError::Handler {
                state: "OPEN",
                reason: "sensor lost".into(),
            })
        }
    }

    fn machine() -> StateMachine<Door, Ctx> {
        StateMachine::new()
            .with_handler(Door::Undefined, ToOpening)
            .with_handler(Door::Opening, Opening)
            .with_handler(Door::Open, Failing)
    }

    #[test]
    fn entry_hook_runs_once_per_entry() {
        let mut sm = machine();
        let mut ctx = Ctx::default();

        assert_eq!(sm.current_state(), Door::Undefined);
        assert_eq!(sm.run(&mut ctx).unwrap(), Door::Opening);
        assert_eq!(sm.run(&mut ctx).unwrap(), Door::Opening);
        assert_eq!(sm.run(&mut ctx).unwrap(), Door::Opening);
        assert_eq!((ctx.entries, ctx.runs), (1, 2));

        sm.force_next_state(Door::Opening);
        sm.run(&mut ctx).unwrap();
        assert_eq!(ctx.entries, 2);
    }

    #[test]
    fn transition_depends_on_state_and_context() {
        let mut a = machine();
        let mut b = machine();
        let mut ctx_a = Ctx::default();
        let mut ctx_b = Ctx::default();
        for sensor in [false, false, true] {
            ctx_a.sensor_open = sensor;
            ctx_b.sensor_open = sensor;
            assert_eq!(a.run(&mut ctx_a).unwrap(), b.run(&mut ctx_b).unwrap());
        }
        assert_eq!(a.current_state(), Door::Open);
    }

    #[test]
    fn handler_error_keeps_state() {
        let mut sm = machine();
        let mut ctx = Ctx {
            sensor_open: true,
            ..Ctx::default()
        };
        sm.run(&mut ctx).unwrap();
        sm.run(&mut ctx).unwrap();
        assert_eq!(sm.current_state(), Door::Open);

        let err = sm.run(&mut ctx).unwrap_err();
        assert!(matches!(err, StateMachineError::Handler { state: "OPEN", .. }));
        assert_eq!(sm.current_state(), Door::Open);
    }

    #[test]
    fn missing_handler_is_reported() {
        let mut sm: StateMachine<Door, Ctx> = StateMachine::new();
        let err = sm.run(&mut Ctx::default()).unwrap_err();
        assert!(matches!(err, StateMachineError::NoHandler("UNDEFINED")));
    }

    #[test]
    fn forcing_undefined_restarts_sequence() {
        let mut sm = machine();
        let mut ctx = Ctx::default();
        sm.run(&mut ctx).unwrap();
        sm.force_next_state(Door::Undefined);
        assert_eq!(sm.run(&mut ctx).unwrap(), Door::Opening);
        assert_eq!(ctx.entries, 0);
        sm.run(&mut ctx).unwrap();
        assert_eq!((ctx.entries, ctx.runs), (1, 1));
    }
}
