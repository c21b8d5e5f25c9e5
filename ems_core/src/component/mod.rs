//! Components own channel sets and expose them to the engine.

pub mod battery;

use std::sync::Arc;
use std::time::Duration;

use ems_common::consts::CHANNEL_STALE_AFTER_MS;

use crate::channel::ChannelSet;
use crate::clock::{Clock, SystemClock};

pub use battery::{SimulatedBattery, SimulatedBatteryConfig};

/// Runtime services handed to components at construction.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    pub clock: Arc<dyn Clock>,
    /// Staleness window for channels declared with `Staleness::Default`.
    pub default_stale_after: Duration,
}

impl ServiceContext {
    pub fn new(clock: Arc<dyn Clock>, default_stale_after: Duration) -> Self {
        Self {
            clock,
            default_stale_after,
        }
    }
}

impl Default for ServiceContext {
    fn default() -> Self {
        Self::new(
            Arc::new(SystemClock),
            Duration::from_millis(CHANNEL_STALE_AFTER_MS),
        )
    }
}

/// Anything that owns channels.
pub trait Component: Send + Sync {
    fn id(&self) -> &str;

    fn channels(&self) -> &ChannelSet;
}
