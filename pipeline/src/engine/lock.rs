//! Per-step mutual exclusion for synchronized units.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::engine::task::NodeTask;

#[derive(Default)]
struct LockState {
    held: bool,
    waiters: VecDeque<NodeTask>,
}

/// Try-lock shared by every node instance reaching one step position.
///
/// A task that loses the race is parked instead of blocking its worker; on
/// release the lock is handed to the oldest parked task, which the caller
/// re-enqueues.
#[derive(Default)]
pub(crate) struct StepLock {
    state: Mutex<LockState>,
}

impl StepLock {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `task`, or park it and return `None`.
    pub(crate) fn acquire_or_park(&self, task: NodeTask) -> Option<NodeTask> {
        let mut state = self.state.lock();
        if state.held {
            state.waiters.push_back(task);
            return None;
        }
        state.held = true;
        Some(task)
    }

    /// Release the lock; returns the parked task it was handed to, if any.
    pub(crate) fn release(&self) -> Option<NodeTask> {
        let mut state = self.state.lock();
        match state.waiters.pop_front() {
            Some(mut next) => {
                next.lock_granted = true;
                Some(next)
            }
            None => {
                state.held = false;
                None
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn is_held(&self) -> bool {
        self.state.lock().held
    }
}
