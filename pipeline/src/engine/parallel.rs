//! Multi-worker engine: a pull-based pool over a shared task queue.
//!
//! Every data node becomes a task holding a cursor into its level's steps.
//! Workers advance tasks in place; an adapter step queues one child task per
//! produced node and parks its parent behind a join barrier. The root task's
//! barrier holds the poison task, so finishing the root shuts the pool down.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::instrument;

use crate::core::plan::Plan;
use crate::engine::lock::StepLock;
use crate::engine::task::{JoinBarrier, NodeTask, Task, WorkQueue};
use crate::engine::watchdog::{Watchdog, WorkerSlot};
use crate::engine::{Level, ScheduleInstance, Step, check_root, next_child, open_adapter, run_unit};
use crate::error::RunError;
use crate::io::config::{EngineConfig, WatchdogConfig};
use crate::unit::{Lineage, NodeRef};

/// Runs sibling nodes concurrently on a fixed pool of worker threads.
#[derive(Debug)]
pub struct ParallelEngine {
    root: Arc<Level>,
    locks: usize,
    workers: usize,
    stack_size: usize,
    watchdog: Option<Watchdog>,
}

impl ParallelEngine {
    pub fn new(plan: &Plan, engine: &EngineConfig, watchdog: &WatchdogConfig) -> Self {
        let (root, locks) = Level::compile(plan, engine.engine_managed_locks);
        Self {
            root,
            locks,
            workers: engine.worker_count().max(1),
            stack_size: engine.stack_size_bytes,
            watchdog: Watchdog::from_config(watchdog),
        }
    }

    /// Replace the configured watchdog, e.g. to add detectors.
    pub fn with_watchdog(mut self, watchdog: Option<Watchdog>) -> Self {
        self.watchdog = watchdog;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Wait for every worker to leave; returns true if the watchdog aborted.
    fn supervise(&self, shared: &Shared) -> bool {
        let mut live = shared.live.lock();
        while *live > 0 {
            let Some(watchdog) = &self.watchdog else {
                shared.drained.wait(&mut live);
                continue;
            };
            shared.drained.wait_for(&mut live, watchdog.poll_interval());
            if *live == 0 {
                break;
            }
            let report = MutexGuard::unlocked(&mut live, || watchdog.inspect(&shared.slots));
            if let Some(report) = report {
                drop(live);
                tracing::error!("aborting run\n{}", report);
                shared.fail(RunError::Watchdog {
                    report: Box::new(report),
                });
                return true;
            }
        }
        false
    }
}

impl ScheduleInstance for ParallelEngine {
    #[instrument(skip_all, fields(engine = "multi-worker", workers = self.workers, root = %root.label()))]
    fn process(&self, root: NodeRef) -> Result<(), RunError> {
        check_root(&self.root, &root)?;
        tracing::info!("run started");

        let shared = Arc::new(Shared::new(self.workers, self.locks));
        shared.queue.push_back(Task::Node(NodeTask {
            id: shared.next_id(),
            level: Arc::clone(&self.root),
            cursor: 0,
            node: root,
            lineage: None,
            barrier: Some(JoinBarrier::new(Task::Poison)),
            lock_granted: false,
        }));

        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(self.workers);
        for index in 0..self.workers {
            let name = worker_name(index);
            *shared.live.lock() += 1;
            let worker_shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(name.clone())
                .stack_size(self.stack_size)
                .spawn(move || worker_loop(worker_shared, index));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    *shared.live.lock() -= 1;
                    shared.fail(RunError::Spawn { name, source });
                    break;
                }
            }
        }

        if self.supervise(&shared) {
            // Wedged workers cannot be joined; they exit on their own once
            // their current step returns.
            drop(handles);
        } else {
            for handle in handles {
                let _ = handle.join();
            }
        }

        let failure = shared.failure.lock().take();
        match failure {
            Some(err) => {
                tracing::info!(error = %err, "run failed");
                Err(err)
            }
            None => {
                tracing::info!("run finished");
                Ok(())
            }
        }
    }
}

fn worker_name(index: usize) -> String {
    format!("pipeline-worker-{index}")
}

/// State shared by the supervisor and every worker of one run.
struct Shared {
    queue: WorkQueue,
    locks: Vec<StepLock>,
    slots: Vec<WorkerSlot>,
    failure: Mutex<Option<RunError>>,
    aborted: AtomicBool,
    live: Mutex<usize>,
    drained: Condvar,
    next_id: AtomicU64,
}

impl Shared {
    fn new(workers: usize, locks: usize) -> Self {
        Self {
            queue: WorkQueue::new(),
            locks: (0..locks).map(|_| StepLock::new()).collect(),
            slots: (0..workers).map(|i| WorkerSlot::new(worker_name(i))).collect(),
            failure: Mutex::new(None),
            aborted: AtomicBool::new(false),
            live: Mutex::new(0),
            drained: Condvar::new(),
            next_id: AtomicU64::new(0),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Record the first failure and shut the pool down.
    fn fail(&self, err: RunError) {
        {
            let mut failure = self.failure.lock();
            if failure.is_none() {
                tracing::debug!(error = %err, "run failing");
                *failure = Some(err);
            }
        }
        self.aborted.store(true, Ordering::SeqCst);
        self.queue.push_front(Task::Poison);
    }
}

/// Marks a worker as gone, even when it unwinds.
struct Departure<'a>(&'a Shared);

impl Drop for Departure<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.fail(RunError::EnginePanicked {
                message: "worker panicked outside a unit".to_string(),
            });
        }
        let mut live = self.0.live.lock();
        *live = live.saturating_sub(1);
        self.0.drained.notify_all();
    }
}

fn worker_loop(shared: Arc<Shared>, index: usize) {
    let _departure = Departure(&shared);
    loop {
        match shared.queue.take() {
            Task::Poison => {
                shared.queue.push_front(Task::Poison);
                break;
            }
            Task::Node(task) => {
                if !shared.aborted() {
                    drive(&shared, index, task);
                }
                shared.slots[index].idle();
            }
        }
    }
    tracing::debug!(worker = index, "worker exiting");
}

/// Advance one task in place until it parks, finishes or fails.
fn drive(shared: &Shared, index: usize, mut task: NodeTask) {
    let slot = &shared.slots[index];
    loop {
        if shared.aborted() {
            return;
        }
        let level = Arc::clone(&task.level);
        let Some(step) = level.steps.get(task.cursor) else {
            match finish(shared, task) {
                Some(next) => {
                    task = next;
                    continue;
                }
                None => return,
            }
        };
        slot.begin(task.id, task.describe());

        if let Some(lock) = step.lock {
            if !task.lock_granted {
                match shared.locks[lock].acquire_or_park(task) {
                    Some(owned) => task = owned,
                    None => return,
                }
            }
            slot.hold(step.unit.name());
        }

        let outcome = match &step.nested {
            None => {
                let result = run_unit(&step.unit, &task.node, task.lineage.as_ref());
                task.cursor += 1;
                task.lock_granted = false;
                result.map(|()| Some(task))
            }
            Some(nested) => fan_out(shared, step, nested, task),
        };
        release_step(shared, index, step);

        match outcome {
            Ok(Some(next)) => task = next,
            Ok(None) => return,
            Err(err) => {
                shared.fail(err);
                return;
            }
        }
    }
}

/// Queue one child task per produced node and park `task` behind a barrier.
/// Returns the parent when no child is outstanding any more.
fn fan_out(
    shared: &Shared,
    step: &Step,
    nested: &Arc<Level>,
    mut task: NodeTask,
) -> Result<Option<NodeTask>, RunError> {
    let node = Arc::clone(&task.node);
    let lineage = task.lineage.clone();
    let below = Arc::new(Lineage::new(Arc::clone(&node), lineage.clone()));
    task.cursor += 1;
    task.lock_granted = false;
    let barrier = JoinBarrier::new(Task::Node(task));

    let mut spawned = 0usize;
    let mut children = open_adapter(&step.unit, &node, lineage.as_ref())?;
    while let Some(child) = next_child(&step.unit, &node, &mut children, nested.node_type)? {
        barrier.retain();
        shared.queue.push_back(Task::Node(NodeTask {
            id: shared.next_id(),
            level: Arc::clone(nested),
            cursor: 0,
            node: child,
            lineage: Some(Arc::clone(&below)),
            barrier: Some(Arc::clone(&barrier)),
            lock_granted: false,
        }));
        spawned += 1;
    }
    drop(children);
    tracing::trace!(unit = step.unit.name(), spawned, "fanned out");

    Ok(resume(shared, barrier.commit()))
}

/// Release the parent barrier of a finished task.
fn finish(shared: &Shared, task: NodeTask) -> Option<NodeTask> {
    let barrier = task.barrier?;
    resume(shared, barrier.release())
}

fn resume(shared: &Shared, fired: Option<Task>) -> Option<NodeTask> {
    match fired {
        Some(Task::Node(next)) => Some(next),
        Some(Task::Poison) => {
            shared.queue.push_front(Task::Poison);
            None
        }
        None => None,
    }
}

fn release_step(shared: &Shared, index: usize, step: &Step) {
    let Some(lock) = step.lock else {
        return;
    };
    shared.slots[index].unhold(step.unit.name());
    if let Some(next) = shared.locks[lock].release() {
        shared.queue.push_back(Task::Node(next));
    }
}
