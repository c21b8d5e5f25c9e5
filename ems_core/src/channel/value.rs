//! Channel values and declared value types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared type of a channel.
///
/// Integer widths only constrain the accepted range; all integers are
/// stored as `i64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Boolean,
    Short,
    Integer,
    Long,
    Float,
    String,
}

impl ValueType {
    /// Whether min/max write bounds apply.
    #[inline]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Short | Self::Integer | Self::Long | Self::Float)
    }

    const fn int_range(self) -> Option<(i64, i64)> {
        match self {
            Self::Short => Some((i16::MIN as i64, i16::MAX as i64)),
            Self::Integer => Some((i32::MIN as i64, i32::MAX as i64)),
            Self::Long => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }
}

/// A channel value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Numeric view; booleans map to 0/1, text is not numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Text(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Int(i) => Some(*i),
            Self::Float(f) if f.is_finite() => Some(f.round() as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(0) => Some(false),
            Self::Int(1) => Some(true),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Convert into the representation of `target`.
    ///
    /// Returns `None` when the value has no lossless-enough equivalent:
    /// out-of-range integers, non-finite floats for integer types, or text
    /// that does not parse.
    pub fn convert(&self, target: ValueType) -> Option<Value> {
        match target {
            ValueType::Boolean => match self {
                Self::Bool(b) => Some(Self::Bool(*b)),
                Self::Int(0) => Some(Self::Bool(false)),
                Self::Int(1) => Some(Self::Bool(true)),
                Self::Float(f) if *f == 0.0 => Some(Self::Bool(false)),
                Self::Float(f) if *f == 1.0 => Some(Self::Bool(true)),
                Self::Text(s) if s.eq_ignore_ascii_case("true") => Some(Self::Bool(true)),
                Self::Text(s) if s.eq_ignore_ascii_case("false") => Some(Self::Bool(false)),
                _ => None,
            },
            ValueType::Short | ValueType::Integer | ValueType::Long => {
                let (lo, hi) = target.int_range()?;
                let raw = match self {
                    Self::Text(s) => s.trim().parse::<i64>().ok()?,
                    Self::Float(f) => {
                        if !f.is_finite() || *f < lo as f64 || *f > hi as f64 {
                            return None;
                        }
                        f.round() as i64
                    }
                    other => other.as_i64()?,
                };
                (lo..=hi).contains(&raw).then_some(Self::Int(raw))
            }
            ValueType::Float => match self {
                Self::Text(s) => s.trim().parse::<f64>().ok().map(Self::Float),
                other => other.as_f64().map(Self::Float),
            },
            ValueType::String => Some(Self::Text(self.to_string())),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}
