//! Task pools of several sources sharing one bridge.

use std::fmt;
use std::sync::Arc;

use super::{ManagedTask, TaskPool};

/// One [`TaskPool`] per source (device), selected together.
pub struct MetaTaskPool<T: ?Sized> {
    sources: Vec<(String, TaskPool<T>)>,
    cursor: usize,
}

impl<T: ManagedTask + ?Sized> MetaTaskPool<T> {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            cursor: 0,
        }
    }

    /// Pool of `source_id`, created on first use.
    pub fn add_source(&mut self, source_id: &str) -> &mut TaskPool<T> {
        let index = match self.sources.iter().position(|(id, _)| id == source_id) {
            Some(index) => index,
            None => {
                self.sources.push((source_id.to_string(), TaskPool::new()));
                self.sources.len() - 1
            }
        };
        &mut self.sources[index].1
    }

    /// Drop a source and all of its tasks.
    pub fn remove_source(&mut self, source_id: &str) -> Option<TaskPool<T>> {
        let index = self.sources.iter().position(|(id, _)| id == source_id)?;
        if index < self.cursor {
            self.cursor -= 1;
        }
        Some(self.sources.remove(index).1)
    }

    pub fn source(&self, source_id: &str) -> Option<&TaskPool<T>> {
        self.sources
            .iter()
            .find(|(id, _)| id == source_id)
            .map(|(_, pool)| pool)
    }

    pub fn source_mut(&mut self, source_id: &str) -> Option<&mut TaskPool<T>> {
        self.sources
            .iter_mut()
            .find(|(id, _)| id == source_id)
            .map(|(_, pool)| pool)
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Union of each source's selection, in source registration order.
    pub fn select_for_this_tick(&mut self) -> Vec<Arc<T>> {
        self.sources
            .iter_mut()
            .flat_map(|(_, pool)| pool.select_for_this_tick())
            .collect()
    }

    /// One task, rotating across sources so one busy device cannot starve
    /// the others.
    pub fn select_one(&mut self) -> Option<Arc<T>> {
        let len = self.sources.len();
        for step in 0..len {
            let index = (self.cursor + step) % len;
            if let Some(task) = self.sources[index].1.select_one() {
                self.cursor = index + 1;
                return Some(task);
            }
        }
        None
    }

    pub fn reset_once(&mut self) {
        for (_, pool) in &mut self.sources {
            pool.reset_once();
        }
    }
}

impl<T: ManagedTask + ?Sized> Default for MetaTaskPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for MetaTaskPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.sources.iter().map(|(id, pool)| (id, pool)))
            .finish()
    }
}
