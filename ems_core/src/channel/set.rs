//! Per-component channel registry built from a static channel table.

use ems_common::types::Level;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::doc::{self, ChannelDoc};
use super::{Channel, ChannelAddress, WriteChannel};
use crate::component::ServiceContext;
use crate::error::ChannelError;

/// One entry of a [`ChannelSet`].
#[derive(Debug, Clone)]
pub enum ChannelRef {
    Read(Arc<Channel>),
    Write(Arc<WriteChannel>),
}

impl ChannelRef {
    pub fn channel(&self) -> &Channel {
        match self {
            Self::Read(ch) => ch,
            Self::Write(ch) => ch.channel(),
        }
    }

    pub fn as_write(&self) -> Option<&Arc<WriteChannel>> {
        match self {
            Self::Write(ch) => Some(ch),
            Self::Read(_) => None,
        }
    }
}

/// All channels of one component, keyed by channel id.
#[derive(Debug)]
pub struct ChannelSet {
    component_id: String,
    channels: BTreeMap<&'static str, ChannelRef>,
}

impl ChannelSet {
    /// Instantiate every entry of `table`. Writable entries become write
    /// channels.
    pub fn from_table(
        component_id: impl Into<String>,
        table: &'static [ChannelDoc],
        services: &ServiceContext,
    ) -> Self {
        debug_assert!(
            doc::duplicate_id(table).is_none(),
            "duplicate channel id in table"
        );
        let component_id = component_id.into();
        let channels = table
            .iter()
            .map(|doc| {
                let channel = Channel::new(
                    ChannelAddress::new(component_id.clone(), doc.id),
                    *doc,
                    doc.stale_after(services.default_stale_after),
                    services.clock.clone(),
                );
                let entry = if doc.access.is_writable() {
                    ChannelRef::Write(Arc::new(WriteChannel::new(channel)))
                } else {
                    ChannelRef::Read(Arc::new(channel))
                };
                (doc.id, entry)
            })
            .collect();
        Self {
            component_id,
            channels,
        }
    }

    pub fn component_id(&self) -> &str {
        &self.component_id
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Look up any channel.
    pub fn channel(&self, id: &str) -> Result<&Channel, ChannelError> {
        self.entry(id).map(ChannelRef::channel)
    }

    /// Look up a writable channel.
    pub fn write_channel(&self, id: &str) -> Result<&Arc<WriteChannel>, ChannelError> {
        let entry = self.entry(id)?;
        entry.as_write().ok_or_else(|| ChannelError::NotWritable {
            address: entry.channel().address().to_string(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelRef> {
        self.channels.values()
    }

    /// Worst level among boolean state channels currently `true`.
    pub fn highest_level(&self) -> Level {
        self.iter()
            .map(ChannelRef::channel)
            .filter_map(|ch| {
                let level = ch.doc().level?;
                let active = ch.value().and_then(|v| v.as_bool()).unwrap_or(false);
                active.then_some(level)
            })
            .max()
            .unwrap_or(Level::Ok)
    }

    fn entry(&self, id: &str) -> Result<&ChannelRef, ChannelError> {
        self.channels
            .get(id)
            .ok_or_else(|| ChannelError::UnknownChannel {
                component: self.component_id.clone(),
                channel: id.to_string(),
            })
    }
}
