//! # Backlog Module
//!
//! The backlog tracks every outstanding task from submission until the worker
//! that ran it removes it again.
//!
//! ## Delivery States
//!
//! - **Dispatched** - handed to a worker (or assumed to be, while the
//!   dispatcher attempts a direct hand-off); the worker owns the task
//! - **Pending** - no worker was free; the backlog owns the task until the
//!   drain process picks it up
//!
//! Pending entries are selected in no particular order. Once backpressure kicks
//! in, delivery order is not submission order.
//!
//! All operations are serialized by a single mutex; the map itself is never
//! exposed.

use crate::ids::TaskId;
use crate::task::Task;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::warn;

/// Callback fired when the backlog transitions to empty
pub type EmptyListener = Box<dyn Fn() + Send + Sync>;

enum DeliveryState {
    Dispatched,
    Pending(Task),
}

/// Outstanding tasks and their delivery state
#[derive(Default)]
pub struct Backlog {
    entries: Mutex<HashMap<TaskId, DeliveryState>>,
    on_empty: OnceLock<EmptyListener>,
}

impl Backlog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<TaskId, DeliveryState>> {
        // Entries are plain data; a panic while holding the lock cannot leave
        // the map half-updated.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install the listener notified whenever a delete empties the backlog.
    ///
    /// Only one listener is supported; later calls are ignored.
    pub fn set_empty_listener(&self, listener: EmptyListener) {
        if self.on_empty.set(listener).is_err() {
            warn!("Backlog empty listener already installed - ignoring replacement");
        }
    }

    /// Record a newly submitted task as dispatched
    pub fn register(&self, id: TaskId) {
        self.entries().insert(id, DeliveryState::Dispatched);
    }

    /// Demote a task that could not be handed off, taking ownership of it
    pub fn mark_pending(&self, task: Task) {
        self.entries()
            .insert(task.id(), DeliveryState::Pending(task));
    }

    /// Claim any pending task, marking it dispatched.
    ///
    /// Returns `None` when nothing is pending.
    #[must_use]
    pub fn take_next(&self) -> Option<Task> {
        let mut entries = self.entries();
        let id = entries
            .iter()
            .find_map(|(id, state)| matches!(state, DeliveryState::Pending(_)).then_some(*id))?;
        match entries.insert(id, DeliveryState::Dispatched) {
            Some(DeliveryState::Pending(task)) => Some(task),
            _ => None,
        }
    }

    /// Remove a task unconditionally.
    ///
    /// Returns whether the task was present. Emptying the backlog notifies the
    /// empty listener, if any, after the lock is released.
    pub fn delete(&self, id: TaskId) -> bool {
        let (removed, became_empty) = {
            let mut entries = self.entries();
            let removed = entries.remove(&id).is_some();
            (removed, removed && entries.is_empty())
        };
        if became_empty {
            if let Some(listener) = self.on_empty.get() {
                listener();
            }
        }
        removed
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.entries().len()
    }

    /// Number of entries waiting for the drain process
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.entries()
            .values()
            .filter(|state| matches!(state, DeliveryState::Pending(_)))
            .count()
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.entries()
            .values()
            .any(|state| matches!(state, DeliveryState::Pending(_)))
    }
}
