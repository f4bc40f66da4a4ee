//! Worker slots bounding how many tasks run at once.
//!
//! Each slot holds at most one task id. The scheduler owns the pool and
//! acquires a slot before starting a task, releasing it on the task's
//! terminal event.

use crate::db::TaskId;

/// Hard upper bound on concurrent tasks, whatever the configuration says.
pub const MAX_WORKER_SLOTS: usize = 2;

/// In-memory slot map: `slots[i]` is the task running in slot `i`.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    slots: Vec<Option<TaskId>>,
}

impl WorkerPool {
    /// Create a pool with `configured` slots, clamped to `1..=MAX_WORKER_SLOTS`.
    pub fn new(configured: usize) -> Self {
        Self {
            slots: vec![None; configured.clamp(1, MAX_WORKER_SLOTS)],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn has_capacity(&self) -> bool {
        self.slots.iter().any(Option::is_none)
    }

    /// Take a free slot for `task_id`. A task that already holds a slot gets
    /// the same slot back. Returns None when every slot is taken.
    pub fn acquire(&mut self, task_id: TaskId) -> Option<usize> {
        if let Some(slot) = self.slot_of(task_id) {
            return Some(slot);
        }
        let slot = self.slots.iter().position(Option::is_none)?;
        self.slots[slot] = Some(task_id);
        Some(slot)
    }

    /// Free the slot held by `task_id`. No-op returning None if it holds none.
    pub fn release_by_task(&mut self, task_id: TaskId) -> Option<usize> {
        let slot = self.slot_of(task_id)?;
        self.slots[slot] = None;
        Some(slot)
    }

    pub fn slot_of(&self, task_id: TaskId) -> Option<usize> {
        self.slots.iter().position(|s| *s == Some(task_id))
    }

    /// Task ids currently holding a slot, in slot order.
    pub fn running_task_ids(&self) -> Vec<TaskId> {
        self.slots.iter().flatten().copied().collect()
    }
}
