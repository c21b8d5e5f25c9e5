//! Task priority pool.
//!
//! Each tick a bridge asks its pool which communication tasks to service:
//!
//! - every HIGH task,
//! - at most one ONCE task that was never delivered before,
//! - exactly one LOW task, rotating through the LOW tasks.
//!
//! For idle time between ticks [`TaskPool::select_one`] hands out single
//! tasks in round-robin order across all priorities.

pub mod meta;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub use meta::MetaTaskPool;

/// Scheduling class of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Delivered a single time per pool lifetime, e.g. reading static
    /// identification registers.
    Once,
    Low,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Once => "ONCE",
            Self::Low => "LOW",
            Self::High => "HIGH",
        })
    }
}

/// A unit of work selected by a [`TaskPool`].
pub trait ManagedTask: Send + Sync {
    fn priority(&self) -> Priority;

    fn name(&self) -> &str;
}

/// Handle returned by [`TaskPool::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

struct Entry<T: ?Sized> {
    id: TaskId,
    priority: Priority,
    task: Arc<T>,
    delivered: bool,
}

/// Priority-aware selector over a dynamic set of tasks.
pub struct TaskPool<T: ?Sized> {
    entries: Vec<Entry<T>>,
    next_id: u64,
    /// Position of the next LOW task among LOW entries.
    low_cursor: usize,
    /// Position of the next candidate for `select_one` among all entries.
    any_cursor: usize,
}

impl<T: ManagedTask + ?Sized> TaskPool<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
            low_cursor: 0,
            any_cursor: 0,
        }
    }

    /// Register a task. Its priority is read once, here.
    pub fn add(&mut self, task: Arc<T>) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.entries.push(Entry {
            id,
            priority: task.priority(),
            task,
            delivered: false,
        });
        id
    }

    /// Unregister a task. Rotation positions of the remaining tasks are
    /// preserved.
    pub fn remove(&mut self, id: TaskId) -> Option<Arc<T>> {
        let index = self.entries.iter().position(|e| e.id == id)?;
        if index < self.any_cursor {
            self.any_cursor -= 1;
        }
        if self.entries[index].priority == Priority::Low {
            let low_index = self.entries[..index]
                .iter()
                .filter(|e| e.priority == Priority::Low)
                .count();
            if low_index < self.low_cursor {
                self.low_cursor -= 1;
            }
        }
        Some(self.entries.remove(index).task)
    }

    /// Make all ONCE tasks deliverable again, e.g. after a reconnect.
    pub fn reset_once(&mut self) {
        for entry in &mut self.entries {
            entry.delivered = false;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: TaskId) -> Option<&Arc<T>> {
        self.entries.iter().find(|e| e.id == id).map(|e| &e.task)
    }

    /// Tasks to execute this tick: all HIGH, then the next ONCE, then the
    /// next LOW.
    pub fn select_for_this_tick(&mut self) -> Vec<Arc<T>> {
        let mut selected: Vec<Arc<T>> = self
            .entries
            .iter()
            .filter(|e| e.priority == Priority::High)
            .map(|e| e.task.clone())
            .collect();

        if let Some(once) = self
            .entries
            .iter_mut()
            .find(|e| e.priority == Priority::Once && !e.delivered)
        {
            once.delivered = true;
            selected.push(once.task.clone());
        }

        let lows: Vec<&Entry<T>> = self
            .entries
            .iter()
            .filter(|e| e.priority == Priority::Low)
            .collect();
        if !lows.is_empty() {
            let index = self.low_cursor % lows.len();
            selected.push(lows[index].task.clone());
            self.low_cursor = index + 1;
        }

        selected
    }

    /// One task in round-robin order across all priorities. Delivered ONCE
    /// tasks are skipped; a ONCE task returned here counts as delivered.
    pub fn select_one(&mut self) -> Option<Arc<T>> {
        let len = self.entries.len();
        for step in 0..len {
            let index = (self.any_cursor + step) % len;
            let entry = &mut self.entries[index];
            if entry.priority == Priority::Once {
                if entry.delivered {
                    continue;
                }
                entry.delivered = true;
            }
            self.any_cursor = index + 1;
            return Some(entry.task.clone());
        }
        None
    }
}

impl<T: ManagedTask + ?Sized> Default for TaskPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for TaskPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskPool")
            .field("tasks", &self.entries.len())
            .field("low_cursor", &self.low_cursor)
            .field("any_cursor", &self.any_cursor)
            .finish()
    }
}
