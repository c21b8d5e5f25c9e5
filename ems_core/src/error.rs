//! Error types of the scan-cycle runtime.
//!
//! None of these errors ever stops the cycle: they are returned to the
//! caller at the boundary where they occur (channel, controller, state
//! handler, bridge task), logged with the offending identifier and dropped.
//! Only [`CycleError`] raised before the first tick is fatal.

use thiserror::Error;

use crate::channel::{Value, ValueType};

/// Which merged bound a write request violated.
#[derive(Debug, Clone, PartialEq)]
pub enum Bound {
    Min(f64),
    Max(f64),
}

impl std::fmt::Display for Bound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Min(v) => write!(f, "min {v}"),
            Self::Max(v) => write!(f, "max {v}"),
        }
    }
}

/// Channel access error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChannelError {
    /// Value cannot be represented in the channel's declared type.
    #[error("{address}: cannot convert '{value}' to {expected:?}")]
    TypeMismatch {
        address: String,
        value: Value,
        expected: ValueType,
    },

    /// Write request falls outside the bounds merged this cycle.
    #[error("{address}: write value {value} violates {bound}")]
    WriteConstraint {
        address: String,
        value: Value,
        bound: Bound,
    },

    /// Channel is declared read-only.
    #[error("{address}: channel is not writable")]
    NotWritable { address: String },

    /// Min/max bounds requested on a non-numeric channel.
    #[error("{address}: bounds require a numeric channel, found {found:?}")]
    NotNumeric { address: String, found: ValueType },

    /// No channel with this id on the component.
    #[error("{component}: unknown channel '{channel}'")]
    UnknownChannel { component: String, channel: String },
}

/// Failure reported by a controller run.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("{0}")]
    Other(String),
}

/// Failure inside a state machine step.
#[derive(Debug, Error)]
pub enum StateMachineError {
    /// No handler was registered for the current state.
    #[error("no handler registered for state {0}")]
    NoHandler(&'static str),

    /// A handler failed; the machine keeps its current state.
    #[error("handler for state {state} failed: {reason}")]
    Handler { state: &'static str, reason: String },

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Failure of a bridge task on the worker thread.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Device did not answer.
    #[error("{task}: communication failed: {reason}")]
    Communication { task: String, reason: String },

    /// Worker thread is gone; tasks can no longer be dispatched.
    #[error("bridge worker '{0}' stopped")]
    WorkerStopped(String),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Failure reported by a phase listener.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    StateMachine(#[from] StateMachineError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Startup or loop-level failure of the cycle engine.
#[derive(Debug, Error)]
pub enum CycleError {
    /// RT system call failed.
    #[error("RT setup error: {0}")]
    RtSetup(String),

    /// Invalid configuration detected while assembling the runtime.
    #[error(transparent)]
    Config(#[from] ems_common::config::ConfigError),

    /// Component or bridge could not be wired.
    #[error("wiring error: {0}")]
    Wiring(String),

    #[error(transparent)]
    Watchdog(#[from] ems_common::watchdog::WatchdogError),
}
