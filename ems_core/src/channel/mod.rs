//! Channels: named data cells with a promoted value and a pending next value.
//!
//! Producers (bridge worker threads, components) write the *next* value at
//! any time. The cycle engine promotes next → current exactly once per tick,
//! before any controller runs, so every controller sees the same snapshot
//! (the process image) for the whole tick.
//!
//! ```text
//!  bridge thread ──set_next_value()──►  next ─┐
//!                                              │ promote_process_image()  (once per tick)
//!  controllers   ◄──────value()──────  value ◄┘
//! ```

pub mod doc;
pub mod set;
pub mod value;
pub mod write;

pub use doc::{ChannelDoc, Staleness};
pub use set::ChannelSet;
pub use value::{Value, ValueType};
pub use write::{WriteChannel, WriteCommand};

use parking_lot::Mutex;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, trace};

use crate::clock::Clock;
use crate::error::ChannelError;

/// Fully qualified channel address: `component/Channel`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelAddress {
    pub component: String,
    pub channel: &'static str,
}

impl ChannelAddress {
    pub fn new(component: impl Into<String>, channel: &'static str) -> Self {
        Self {
            component: component.into(),
            channel,
        }
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.component, self.channel)
    }
}

/// Promoted value change passed to update listeners.
#[derive(Debug)]
pub struct ValueChange<'a> {
    pub address: &'a ChannelAddress,
    pub old: Option<&'a Value>,
    pub new: Option<&'a Value>,
}

/// Callback invoked synchronously after a promotion changed the value.
pub type UpdateListener = dyn Fn(&ValueChange<'_>) + Send + Sync;

#[derive(Debug, Default)]
struct Slots {
    value: Option<Value>,
    next: Option<Value>,
    refreshed_at: Option<Instant>,
}

/// A named cell holding the promoted value and the pending next value.
pub struct Channel {
    address: ChannelAddress,
    doc: ChannelDoc,
    stale_after: Option<Duration>,
    clock: Arc<dyn Clock>,
    slots: Mutex<Slots>,
    listeners: Mutex<Vec<Arc<UpdateListener>>>,
}

impl Channel {
    /// Create a channel; `stale_after` is the resolved staleness window.
    pub fn new(
        address: ChannelAddress,
        doc: ChannelDoc,
        stale_after: Option<Duration>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            address,
            doc,
            stale_after,
            clock,
            slots: Mutex::new(Slots::default()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    #[inline]
    pub fn address(&self) -> &ChannelAddress {
        &self.address
    }

    #[inline]
    pub fn doc(&self) -> &ChannelDoc {
        &self.doc
    }

    #[inline]
    pub fn value_type(&self) -> ValueType {
        self.doc.value_type
    }

    /// Value of the current process image, `None` if undefined or stale.
    pub fn value(&self) -> Option<Value> {
        self.slots.lock().value.clone()
    }

    /// Pending value that will be promoted on the next tick.
    pub fn next_value(&self) -> Option<Value> {
        self.slots.lock().next.clone()
    }

    /// Queue `value` for promotion. Safe from any thread; last writer wins.
    ///
    /// The value is converted to the declared type first. On mismatch the
    /// pending slot is left untouched.
    pub fn set_next_value(&self, value: impl Into<Value>) -> Result<(), ChannelError> {
        let value = value.into();
        let converted =
            value
                .convert(self.doc.value_type)
                .ok_or_else(|| ChannelError::TypeMismatch {
                    address: self.address.to_string(),
                    value,
                    expected: self.doc.value_type,
                })?;
        let now = self.clock.now();
        let mut slots = self.slots.lock();
        slots.next = Some(converted);
        slots.refreshed_at = Some(now);
        Ok(())
    }

    /// Mark the pending value as undefined, e.g. after a failed read.
    pub fn set_next_undefined(&self) {
        let now = self.clock.now();
        let mut slots = self.slots.lock();
        slots.next = None;
        slots.refreshed_at = Some(now);
    }

    /// Copy next → value. Called by the cycle engine once per tick.
    ///
    /// Returns `true` if the promoted value changed. Listeners run after the
    /// slot lock is released.
    pub fn promote_process_image(&self, now: Instant) -> bool {
        let (old, new) = {
            let mut slots = self.slots.lock();
            let fresh = match (self.stale_after, slots.refreshed_at) {
                (Some(window), Some(at)) => now.saturating_duration_since(at) <= window,
                _ => true,
            };
            let promoted = if fresh { slots.next.clone() } else { None };
            if promoted == slots.value {
                return false;
            }
            let old = std::mem::replace(&mut slots.value, promoted.clone());
            (old, promoted)
        };

        trace!(channel = %self.address, old = ?old, new = ?new, "value changed");
        self.notify(old.as_ref(), new.as_ref());
        true
    }

    /// Register a callback for promoted value changes.
    pub fn on_update<F>(&self, listener: F)
    where
        F: Fn(&ValueChange<'_>) + Send + Sync + 'static,
    {
        self.listeners.lock().push(Arc::new(listener));
    }

    fn notify(&self, old: Option<&Value>, new: Option<&Value>) {
        let listeners: Vec<Arc<UpdateListener>> = self.listeners.lock().clone();
        if listeners.is_empty() {
            return;
        }
        let change = ValueChange {
            address: &self.address,
            old,
            new,
        };
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&change))).is_err() {
                error!(channel = %self.address, "update listener panicked");
            }
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.lock();
        f.debug_struct("Channel")
            .field("address", &self.address.to_string())
            .field("value", &slots.value)
            .field("next", &slots.next)
            .finish()
    }
}

static_assertions::assert_impl_all!(Channel: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn channel(doc: ChannelDoc, stale: Option<Duration>) -> (Channel, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let ch = Channel::new(
            ChannelAddress::new("battery0", doc.id),
            doc,
            stale,
            clock.clone(),
        );
        (ch, clock)
    }

    #[test]
    fn value_changes_only_on_promotion() {
        let (ch, clock) = channel(ChannelDoc::new("Soc", ValueType::Integer), None);
        assert_eq!(ch.value(), None);

        ch.set_next_value(55).unwrap();
        assert_eq!(ch.value(), None);
        assert_eq!(ch.next_value(), Some(Value::Int(55)));

        assert!(ch.promote_process_image(clock.now()));
        assert_eq!(ch.value(), Some(Value::Int(55)));

        // Repeated promotion of the same value is not a change.
        assert!(!ch.promote_process_image(clock.now()));
    }

    #[test]
    fn last_writer_before_promotion_wins() {
        let (ch, clock) = channel(ChannelDoc::new("Voltage", ValueType::Integer), None);
        ch.set_next_value(400).unwrap();
        ch.set_next_value(401).unwrap();
        ch.promote_process_image(clock.now());
        assert_eq!(ch.value(), Some(Value::Int(401)));
    }

    #[test]
    fn type_mismatch_keeps_pending_value() {
        let (ch, _clock) = channel(ChannelDoc::new("Soc", ValueType::Short), None);
        ch.set_next_value(10).unwrap();
        let err = ch.set_next_value("full").unwrap_err();
        assert!(matches!(err, ChannelError::TypeMismatch { .. }));
        let err = ch.set_next_value(100_000).unwrap_err();
        assert!(matches!(err, ChannelError::TypeMismatch { .. }));
        assert_eq!(ch.next_value(), Some(Value::Int(10)));
    }

    #[test]
    fn stale_value_promotes_undefined() {
        let (ch, clock) = channel(
            ChannelDoc::new("ActivePower", ValueType::Integer),
            Some(Duration::from_secs(5)),
        );
        ch.set_next_value(1200).unwrap();
        clock.advance(Duration::from_secs(5));
        ch.promote_process_image(clock.now());
        assert_eq!(ch.value(), Some(Value::Int(1200)));

        clock.advance(Duration::from_secs(1));
        ch.promote_process_image(clock.now());
        assert_eq!(ch.value(), None);

        // A fresh sample revives the channel.
        ch.set_next_value(1300).unwrap();
        ch.promote_process_image(clock.now());
        assert_eq!(ch.value(), Some(Value::Int(1300)));
    }

    #[test]
    fn undefined_next_value_clears_promoted_value() {
        let (ch, clock) = channel(ChannelDoc::new("Current", ValueType::Integer), None);
        ch.set_next_value(3).unwrap();
        ch.promote_process_image(clock.now());
        ch.set_next_undefined();
        assert!(ch.promote_process_image(clock.now()));
        assert_eq!(ch.value(), None);
    }

    #[test]
    fn listeners_run_on_change_and_panics_are_contained() {
        let (ch, clock) = channel(ChannelDoc::new("Soc", ValueType::Integer), None);
        let calls = Arc::new(AtomicUsize::new(0));

        ch.on_update(|_| panic!("listener failure"));
        let seen = calls.clone();
        ch.on_update(move |change| {
            assert_eq!(change.new, Some(&Value::Int(80)));
            seen.fetch_add(1, Ordering::SeqCst);
        });

        ch.set_next_value(80).unwrap();
        ch.promote_process_image(clock.now());
        ch.promote_process_image(clock.now());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_producers_never_tear_values() {
        let (ch, clock) = channel(ChannelDoc::new("Counter", ValueType::Long), None);
        let ch = Arc::new(ch);
        let producers: Vec<_> = (0..4)
            .map(|t| {
                let ch = ch.clone();
                std::thread::spawn(move || {
                    for i in 0..1000i64 {
                        ch.set_next_value(t * 10_000 + i).unwrap();
                    }
                })
            })
            .collect();
        for _ in 0..100 {
            ch.promote_process_image(clock.now());
            if let Some(Value::Int(v)) = ch.value() {
                assert!((0..40_000).contains(&v));
            }
        }
        for p in producers {
            p.join().unwrap();
        }
        ch.promote_process_image(clock.now());
        assert!(ch.value().is_some());
    }
}
