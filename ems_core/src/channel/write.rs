//! Write channels and the shadow-copy protocol.
//!
//! Controllers queue write requests and narrow min/max bounds during the
//! controller phase. In EXECUTE_WRITE the engine calls
//! [`WriteChannel::shadow_copy_and_reset`], which resolves everything queued
//! this tick into one [`WriteCommand`] and clears the request. A bridge thread
//! therefore never observes a command that a controller is still mutating.

use parking_lot::Mutex;
use std::fmt;
use std::ops::Deref;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::{Channel, Value, ValueType};
use crate::error::{Bound, ChannelError};

/// Resolved write command captured at the shadow-copy point.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WriteCommand {
    /// Value to write, already clamped into `min..=max`.
    pub value: Option<Value>,
    /// Tightest lower bound requested this tick.
    pub min: Option<Value>,
    /// Tightest upper bound requested this tick.
    pub max: Option<Value>,
}

impl WriteCommand {
    /// Nothing was requested this tick.
    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.min.is_none() && self.max.is_none()
    }
}

/// Pending request, mutated during the controller phase.
#[derive(Debug, Default)]
struct WriteRequest {
    value: Option<Value>,
    min: Option<f64>,
    max: Option<f64>,
}

/// Callback observing each non-empty shadow copy.
pub type WriteObserver = dyn Fn(&Channel, &WriteCommand) + Send + Sync;

/// Channel that additionally accepts write requests.
pub struct WriteChannel {
    channel: Channel,
    pending: Mutex<WriteRequest>,
    shadow: Mutex<Option<WriteCommand>>,
    observers: Mutex<Vec<Arc<WriteObserver>>>,
}

impl WriteChannel {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            pending: Mutex::new(WriteRequest::default()),
            shadow: Mutex::new(None),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Underlying read side.
    #[inline]
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Queue a write request. The last call before the write phase wins.
    ///
    /// # Errors
    /// - `NotWritable` for read-only channels
    /// - `TypeMismatch` if the value cannot be converted
    /// - `WriteConstraint` if it violates bounds already merged this tick
    pub fn set_next_write_value(&self, value: impl Into<Value>) -> Result<(), ChannelError> {
        let value = self.convert(value.into())?;
        let mut pending = self.pending.lock();
        if let Some(x) = numeric(&value, self.value_type()) {
            if let Some(min) = pending.min.filter(|min| x < *min) {
                return Err(self.violation(value, Bound::Min(min)));
            }
            if let Some(max) = pending.max.filter(|max| x > *max) {
                return Err(self.violation(value, Bound::Max(max)));
            }
        }
        pending.value = Some(value);
        Ok(())
    }

    /// Narrow the lower bound for this tick. Never widens.
    pub fn push_write_min(&self, min: impl Into<Value>) -> Result<(), ChannelError> {
        let min = self.bound(min.into())?;
        let mut pending = self.pending.lock();
        pending.min = Some(pending.min.map_or(min, |cur| cur.max(min)));
        Ok(())
    }

    /// Narrow the upper bound for this tick. Never widens.
    pub fn push_write_max(&self, max: impl Into<Value>) -> Result<(), ChannelError> {
        let max = self.bound(max.into())?;
        let mut pending = self.pending.lock();
        pending.max = Some(pending.max.map_or(max, |cur| cur.min(max)));
        Ok(())
    }

    /// Currently queued write value (before resolution).
    pub fn next_write_value(&self) -> Option<Value> {
        self.pending.lock().value.clone()
    }

    /// Resolve and capture the pending request, then clear it.
    ///
    /// A non-empty command is stored as the channel's shadow and handed to
    /// write observers. An empty command leaves an unconsumed shadow in
    /// place, so a bridge that skipped a tick still applies it later. A
    /// second call without an intervening request yields an empty command.
    pub fn shadow_copy_and_reset(&self) -> WriteCommand {
        let request = std::mem::take(&mut *self.pending.lock());
        let command = self.resolve(request);
        if command.is_empty() {
            return command;
        }

        debug!(channel = %self.address(), command = ?command, "write command captured");
        let superseded = self.shadow.lock().replace(command.clone());
        if let Some(previous) = superseded {
            debug!(channel = %self.address(), previous = ?previous, "unconsumed write command superseded");
        }

        let observers: Vec<Arc<WriteObserver>> = self.observers.lock().clone();
        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(&self.channel, &command))).is_err() {
                error!(channel = %self.address(), "write observer panicked");
            }
        }
        command
    }

    /// Last captured non-empty command, left in place.
    pub fn shadow(&self) -> Option<WriteCommand> {
        self.shadow.lock().clone()
    }

    /// Consume the last captured command. Used by bridge workers so each
    /// command is applied to hardware exactly once.
    pub fn take_shadow(&self) -> Option<WriteCommand> {
        self.shadow.lock().take().filter(|cmd| !cmd.is_empty())
    }

    /// Drop bounds pushed after the shadow copy; queued values stay.
    pub fn clear_constraints(&self) {
        let mut pending = self.pending.lock();
        pending.min = None;
        pending.max = None;
    }

    /// Register an observer of non-empty shadow copies.
    pub fn on_write<F>(&self, observer: F)
    where
        F: Fn(&Channel, &WriteCommand) + Send + Sync + 'static,
    {
        self.observers.lock().push(Arc::new(observer));
    }

    fn resolve(&self, request: WriteRequest) -> WriteCommand {
        let ty = self.value_type();
        let WriteRequest { value, min, max } = request;

        let value = match value {
            Some(v) => match numeric(&v, ty) {
                None => Some(v),
                Some(x) => match (min, max) {
                    (Some(lo), Some(hi)) if lo > hi => {
                        warn!(
                            channel = %self.address(),
                            min = lo, max = hi, value = %v,
                            "contradicting write bounds, dropping write value"
                        );
                        None
                    }
                    _ => {
                        let clamped = max.map_or(x, |hi| x.min(hi));
                        let clamped = min.map_or(clamped, |lo| clamped.max(lo));
                        if clamped == x {
                            Some(v)
                        } else {
                            debug!(channel = %self.address(), from = x, to = clamped, "write value clamped");
                            Value::Float(clamped).convert(ty)
                        }
                    }
                },
            },
            None => None,
        };

        WriteCommand {
            value,
            min: min.and_then(|lo| Value::Float(lo).convert(ty)),
            max: max.and_then(|hi| Value::Float(hi).convert(ty)),
        }
    }

    fn convert(&self, value: Value) -> Result<Value, ChannelError> {
        if !self.doc().access.is_writable() {
            return Err(ChannelError::NotWritable {
                address: self.address().to_string(),
            });
        }
        value
            .convert(self.value_type())
            .ok_or_else(|| ChannelError::TypeMismatch {
                address: self.address().to_string(),
                value,
                expected: self.value_type(),
            })
    }

    fn bound(&self, value: Value) -> Result<f64, ChannelError> {
        if !self.value_type().is_numeric() {
            return Err(ChannelError::NotNumeric {
                address: self.address().to_string(),
                found: self.value_type(),
            });
        }
        let value = self.convert(value)?;
        match value.as_f64() {
            Some(x) if x.is_finite() => Ok(x),
            Some(_) => Err(ChannelError::TypeMismatch {
                address: self.address().to_string(),
                value,
                expected: self.value_type(),
            }),
            None => Err(ChannelError::NotNumeric {
                address: self.address().to_string(),
                found: self.value_type(),
            }),
        }
    }

    fn violation(&self, value: Value, bound: Bound) -> ChannelError {
        ChannelError::WriteConstraint {
            address: self.address().to_string(),
            value,
            bound,
        }
    }
}

fn numeric(value: &Value, ty: ValueType) -> Option<f64> {
    if ty.is_numeric() { value.as_f64() } else { None }
}

impl Deref for WriteChannel {
    type Target = Channel;

    fn deref(&self) -> &Channel {
        &self.channel
    }
}

impl fmt::Debug for WriteChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteChannel")
            .field("channel", &self.channel)
            .field("pending", &*self.pending.lock())
            .finish()
    }
}

static_assertions::assert_impl_all!(WriteChannel: Send, Sync);
