//! Registry of every channel the engine promotes and shadow-copies.

use std::sync::Arc;
use std::time::Instant;

use crate::channel::WriteChannel;
use crate::channel::set::{ChannelRef, ChannelSet};

#[derive(Debug, Default)]
pub struct ProcessImage {
    channels: Vec<ChannelRef>,
    writes: Vec<Arc<WriteChannel>>,
}

impl ProcessImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add all channels of one component.
    pub fn register(&mut self, set: &ChannelSet) {
        for entry in set.iter() {
            if let Some(write) = entry.as_write() {
                self.writes.push(write.clone());
            }
            self.channels.push(entry.clone());
        }
    }

    /// Remove all channels of `component_id`.
    pub fn unregister(&mut self, component_id: &str) {
        self.channels
            .retain(|entry| entry.channel().address().component != component_id);
        self.writes
            .retain(|ch| ch.address().component != component_id);
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Promote every channel. Returns the number of changed values.
    pub fn promote(&self, now: Instant) -> usize {
        self.channels
            .iter()
            .filter(|entry| entry.channel().promote_process_image(now))
            .count()
    }

    /// Capture the pending write of every write channel.
    /// Returns the number of non-empty commands.
    pub fn shadow_copy_all(&self) -> usize {
        self.writes
            .iter()
            .filter(|ch| !ch.shadow_copy_and_reset().is_empty())
            .count()
    }

    pub fn clear_constraints(&self) {
        for ch in &self.writes {
            ch.clear_constraints();
        }
    }
}
