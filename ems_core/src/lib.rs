//! # EMS Core
//!
//! Scan-cycle runtime of the energy-management system.
//!
//! ## Modules
//!
//! - [`channel`]: channels, write channels, process image values
//! - [`task`]: task priority pool for protocol bridges
//! - [`state`]: generic state machine, retry policy, start/stop sequencer
//! - [`cycle`]: cycle engine, phases, controllers, RT setup
//! - [`bridge`]: protocol bridge boundary and simulated bridge
//! - [`component`]: component contract and the simulated battery
//! - [`config`], [`runtime`]: configuration and composition root

pub mod bridge;
pub mod channel;
pub mod clock;
pub mod component;
pub mod config;
pub mod cycle;
pub mod error;
pub mod runtime;
pub mod state;
pub mod task;
pub mod watchdog;

pub use channel::{Channel, ChannelSet, Value, ValueType, WriteChannel, WriteCommand};
pub use cycle::{Controller, CycleContext, CycleEngine, Phase, PhaseListener, PhaseMask};
pub use error::{ChannelError, ControllerError, CycleError};
