//! Units of queued work for the multi-worker engine.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::engine::Level;
use crate::unit::{Lineage, NodeRef};

/// Work pulled by pool workers.
pub(crate) enum Task {
    Node(NodeTask),
    /// Shuts down each worker that takes it; the worker puts it back first.
    Poison,
}

/// One data node on its way through the steps of one plan level.
pub(crate) struct NodeTask {
    pub(crate) id: u64,
    pub(crate) level: Arc<Level>,
    /// Index of the next step to run.
    pub(crate) cursor: usize,
    pub(crate) node: NodeRef,
    /// Ancestors of `node`, nearest first.
    pub(crate) lineage: Option<Arc<Lineage>>,
    /// Barrier of the parent task, released when this task finishes.
    pub(crate) barrier: Option<Arc<JoinBarrier>>,
    /// Set when the lock of the step at `cursor` was handed over while queued.
    pub(crate) lock_granted: bool,
}

impl NodeTask {
    /// Short identity used in logs and watchdog dumps.
    pub(crate) fn describe(&self) -> String {
        match self.level.steps.get(self.cursor) {
            Some(step) => format!(
                "task {} '{}' on {} (step {})",
                self.id,
                step.unit.name(),
                self.node.label(),
                self.cursor
            ),
            None => format!("task {} finishing {}", self.id, self.node.label()),
        }
    }
}

impl fmt::Debug for NodeTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Shared double-ended queue workers block on.
pub(crate) struct WorkQueue {
    tasks: Mutex<VecDeque<Task>>,
    ready: Condvar,
}

impl WorkQueue {
    pub(crate) fn new() -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    pub(crate) fn push_back(&self, task: Task) {
        self.tasks.lock().push_back(task);
        self.ready.notify_one();
    }

    pub(crate) fn push_front(&self, task: Task) {
        self.tasks.lock().push_front(task);
        self.ready.notify_one();
    }

    /// Block until a task is available.
    pub(crate) fn take(&self) -> Task {
        let mut tasks = self.tasks.lock();
        loop {
            if let Some(task) = tasks.pop_front() {
                return task;
            }
            self.ready.wait(&mut tasks);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.tasks.lock().len()
    }
}

struct BarrierState {
    pending: usize,
    continuation: Option<Task>,
}

/// Fan-out gate: the continuation becomes runnable once every child task
/// and the committing parent have released it.
pub(crate) struct JoinBarrier {
    state: Mutex<BarrierState>,
}

impl JoinBarrier {
    /// Barrier with one outstanding reference held by the creator.
    pub(crate) fn new(continuation: Task) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BarrierState {
                pending: 1,
                continuation: Some(continuation),
            }),
        })
    }

    /// Account for one more child.
    pub(crate) fn retain(&self) {
        self.state.lock().pending += 1;
    }

    /// Drop one reference; returns the continuation when it was the last.
    pub(crate) fn release(&self) -> Option<Task> {
        let mut state = self.state.lock();
        state.pending = state.pending.saturating_sub(1);
        if state.pending == 0 {
            state.continuation.take()
        } else {
            None
        }
    }

    /// The creator is done adding children.
    pub(crate) fn commit(&self) -> Option<Task> {
        self.release()
    }
}
