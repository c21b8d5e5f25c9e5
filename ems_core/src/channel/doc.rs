//! Static channel metadata.
//!
//! Each component type declares its channels once as a `&'static
//! [ChannelDoc]` table. The table is the registry consulted at construction
//! time: identifier → declared type, unit, access mode, severity and
//! staleness policy.
//!
//! ```rust
//! use ems_core::channel::{ChannelDoc, Staleness, ValueType};
//! use ems_common::types::{Level, Unit};
//!
//! const METER_CHANNELS: &[ChannelDoc] = &[
//!     ChannelDoc::new("ActivePower", ValueType::Integer)
//!         .unit(Unit::Watt)
//!         .staleness(Staleness::Default),
//!     ChannelDoc::state("CommunicationFailed", Level::Fault),
//! ];
//! assert_eq!(METER_CHANNELS.len(), 2);
//! ```

use ems_common::types::{AccessMode, Level, Unit};
use std::time::Duration;

use super::ValueType;

/// When a channel's promoted value expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// Value is kept until overwritten. For channels computed by logic.
    Never,
    /// Use the runtime-wide window from `[channels].stale_after_ms`.
    /// For channels fed by a hardware bridge.
    Default,
    /// Explicit window.
    After(Duration),
}

/// Metadata of one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelDoc {
    pub id: &'static str,
    pub value_type: ValueType,
    pub unit: Unit,
    pub access: AccessMode,
    /// Severity when a boolean state channel is `true`.
    pub level: Option<Level>,
    pub staleness: Staleness,
    pub text: &'static str,
}

impl ChannelDoc {
    /// Read-only channel without unit, never stale.
    pub const fn new(id: &'static str, value_type: ValueType) -> Self {
        Self {
            id,
            value_type,
            unit: Unit::None,
            access: AccessMode::ReadOnly,
            level: None,
            staleness: Staleness::Never,
            text: "",
        }
    }

    /// Boolean state channel raising `level` while `true`.
    pub const fn state(id: &'static str, level: Level) -> Self {
        let mut doc = Self::new(id, ValueType::Boolean);
        doc.level = Some(level);
        doc
    }

    pub const fn unit(mut self, unit: Unit) -> Self {
        self.unit = unit;
        self
    }

    pub const fn access(mut self, access: AccessMode) -> Self {
        self.access = access;
        self
    }

    pub const fn staleness(mut self, staleness: Staleness) -> Self {
        self.staleness = staleness;
        self
    }

    pub const fn text(mut self, text: &'static str) -> Self {
        self.text = text;
        self
    }

    /// Resolve the staleness window against the runtime default.
    pub fn stale_after(&self, default: Duration) -> Option<Duration> {
        match self.staleness {
            Staleness::Never => None,
            Staleness::Default => Some(default),
            Staleness::After(d) => Some(d),
        }
    }
}

/// Look up a channel by id in a static table.
pub fn find(table: &'static [ChannelDoc], id: &str) -> Option<&'static ChannelDoc> {
    table.iter().find(|doc| doc.id == id)
}

/// First id that appears twice in a table, if any.
pub fn duplicate_id(table: &[ChannelDoc]) -> Option<&'static str> {
    table
        .iter()
        .enumerate()
        .find(|(i, doc)| table[..*i].iter().any(|prev| prev.id == doc.id))
        .map(|(_, doc)| doc.id)
}
