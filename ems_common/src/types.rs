//! Channel metadata types shared between the runtime and its collaborators.
//!
//! Protocol bridges, persistence and UI transport all need to know the unit
//! and access mode of a channel without depending on the runtime crate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical unit of a channel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    #[default]
    None,
    Percent,
    Watt,
    Kilowatt,
    WattHours,
    Volt,
    Millivolt,
    Ampere,
    Milliampere,
    DegreeCelsius,
    Hertz,
    Millisecond,
    Second,
}

impl Unit {
    /// Short symbol used in debug logs.
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Percent => "%",
            Self::Watt => "W",
            Self::Kilowatt => "kW",
            Self::WattHours => "Wh",
            Self::Volt => "V",
            Self::Millivolt => "mV",
            Self::Ampere => "A",
            Self::Milliampere => "mA",
            Self::DegreeCelsius => "°C",
            Self::Hertz => "Hz",
            Self::Millisecond => "ms",
            Self::Second => "s",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Who may write a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// Produced by a device or component, never written by controllers.
    #[default]
    ReadOnly,
    /// Readable and writable.
    ReadWrite,
    /// Write-only command register.
    WriteOnly,
}

impl AccessMode {
    /// Whether controllers may queue write requests.
    #[inline]
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::ReadWrite | Self::WriteOnly)
    }
}

/// Severity of a boolean state channel when it is `true`.
///
/// Ordered: `Ok < Info < Warning < Fault`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    #[default]
    Ok,
    Info,
    Warning,
    Fault,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "OK",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Fault => "FAULT",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering() {
        assert!(Level::Ok < Level::Info);
        assert!(Level::Info < Level::Warning);
        assert!(Level::Warning < Level::Fault);
        assert_eq!(
            [Level::Info, Level::Fault, Level::Ok].into_iter().max(),
            Some(Level::Fault)
        );
    }

    #[test]
    fn access_mode_writability() {
        assert!(!AccessMode::ReadOnly.is_writable());
        assert!(AccessMode::ReadWrite.is_writable());
        assert!(AccessMode::WriteOnly.is_writable());
    }

    #[test]
    fn unit_symbols() {
        assert_eq!(Unit::Watt.to_string(), "W");
        assert_eq!(Unit::None.to_string(), "");
        assert_eq!(Unit::Millivolt.symbol(), "mV");
    }
}
