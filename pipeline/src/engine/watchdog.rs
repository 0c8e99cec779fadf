//! Supervision of multi-worker runs.
//!
//! Workers publish what they are doing in a [`WorkerSlot`]. The supervisor
//! periodically snapshots every slot and asks each [`Detector`] which workers
//! look wedged. A run is aborted only when one detector implicates every
//! worker that is currently busy.

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::io::config::WatchdogConfig;

#[derive(Debug, Clone)]
struct Activity {
    task: u64,
    description: String,
    since: Instant,
}

#[derive(Debug, Default)]
struct SlotState {
    activity: Option<Activity>,
    held_locks: Vec<String>,
}

/// What one worker is doing, as published by the worker itself.
#[derive(Debug)]
pub struct WorkerSlot {
    thread: String,
    state: Mutex<SlotState>,
}

impl WorkerSlot {
    pub fn new(thread: impl Into<String>) -> Self {
        Self {
            thread: thread.into(),
            state: Mutex::new(SlotState::default()),
        }
    }

    /// Record the start of a step. Restarting the same step keeps its clock;
    /// moving the task on to its next step starts a new one.
    pub(crate) fn begin(&self, task: u64, description: String) {
        let mut state = self.state.lock();
        let same = state
            .activity
            .as_ref()
            .is_some_and(|current| current.task == task && current.description == description);
        if same {
            return;
        }
        state.activity = Some(Activity {
            task,
            description,
            since: Instant::now(),
        });
    }

    pub(crate) fn idle(&self) {
        self.state.lock().activity = None;
    }

    pub(crate) fn hold(&self, lock: &str) {
        self.state.lock().held_locks.push(lock.to_string());
    }

    pub(crate) fn unhold(&self, lock: &str) {
        let mut state = self.state.lock();
        if let Some(pos) = state.held_locks.iter().position(|held| held == lock) {
            state.held_locks.remove(pos);
        }
    }

    pub fn snapshot(&self, index: usize, now: Instant) -> WorkerSnapshot {
        let state = self.state.lock();
        WorkerSnapshot {
            index,
            thread: self.thread.clone(),
            task: state.activity.as_ref().map(|a| a.task),
            description: state.activity.as_ref().map(|a| a.description.clone()),
            elapsed: state
                .activity
                .as_ref()
                .map(|a| now.saturating_duration_since(a.since)),
            held_locks: state.held_locks.clone(),
        }
    }
}

/// Point-in-time view of one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSnapshot {
    pub index: usize,
    pub thread: String,
    pub task: Option<u64>,
    pub description: Option<String>,
    pub elapsed: Option<Duration>,
    pub held_locks: Vec<String>,
}

impl WorkerSnapshot {
    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }
}

impl fmt::Display for WorkerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.description, self.elapsed) {
            (Some(description), Some(elapsed)) => write!(
                f,
                "{}: {} running for {:.3}s",
                self.thread,
                description,
                elapsed.as_secs_f64()
            )?,
            _ => write!(f, "{}: idle", self.thread)?,
        }
        if !self.held_locks.is_empty() {
            write!(f, ", holding [{}]", self.held_locks.join(", "))?;
        }
        Ok(())
    }
}

/// Pluggable check run on every supervisor poll.
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Indices of the workers this detector considers wedged.
    fn implicated(&self, workers: &[WorkerSnapshot]) -> Vec<usize>;
}

/// Flags workers that have been on the same step longer than a timeout.
///
/// Time is measured per step, not per task: a task that keeps advancing
/// through quick steps is never flagged, however long it runs in total.
#[derive(Debug, Clone)]
pub struct StuckTaskDetector {
    timeout: Duration,
}

impl StuckTaskDetector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Detector for StuckTaskDetector {
    fn name(&self) -> &'static str {
        "stuck-task"
    }

    fn implicated(&self, workers: &[WorkerSnapshot]) -> Vec<usize> {
        workers
            .iter()
            .filter(|worker| worker.elapsed.is_some_and(|elapsed| elapsed > self.timeout))
            .map(|worker| worker.index)
            .collect()
    }
}

/// Diagnostic dump produced when the watchdog aborts a run.
#[derive(Debug, Clone)]
pub struct WatchdogReport {
    pub detector: &'static str,
    pub workers: Vec<WorkerSnapshot>,
}

impl WatchdogReport {
    pub fn headline(&self) -> String {
        let active = self.workers.iter().filter(|w| w.is_active()).count();
        format!(
            "detector '{}' implicated all {} active workers",
            self.detector, active
        )
    }
}

impl fmt::Display for WatchdogReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.headline())?;
        for worker in &self.workers {
            writeln!(f, "  {}", worker)?;
        }
        Ok(())
    }
}

/// Detectors applied by the supervisor loop.
pub struct Watchdog {
    detectors: Vec<Box<dyn Detector>>,
    poll_interval: Duration,
}

impl fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.detectors.iter().map(|d| d.name()).collect();
        f.debug_struct("Watchdog")
            .field("detectors", &names)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl Watchdog {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            detectors: Vec::new(),
            poll_interval,
        }
    }

    /// Baseline watchdog from configuration; `None` when disabled.
    pub fn from_config(cfg: &WatchdogConfig) -> Option<Self> {
        if !cfg.enabled {
            return None;
        }
        Some(
            Self::new(cfg.poll_interval())
                .with_detector(Box::new(StuckTaskDetector::new(cfg.stuck_task_timeout()))),
        )
    }

    pub fn with_detector(mut self, detector: Box<dyn Detector>) -> Self {
        self.detectors.push(detector);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Snapshot the workers and return a report if any detector implicates
    /// every active one.
    pub fn inspect(&self, slots: &[WorkerSlot]) -> Option<WatchdogReport> {
        let now = Instant::now();
        let workers: Vec<WorkerSnapshot> = slots
            .iter()
            .enumerate()
            .map(|(index, slot)| slot.snapshot(index, now))
            .collect();
        let active: Vec<usize> = workers
            .iter()
            .filter(|w| w.is_active())
            .map(|w| w.index)
            .collect();
        if active.is_empty() {
            return None;
        }
        for detector in &self.detectors {
            let flagged = detector.implicated(&workers);
            if flagged.is_empty() {
                continue;
            }
            for index in &flagged {
                if let Some(worker) = workers.get(*index) {
                    tracing::warn!(detector = detector.name(), worker = %worker, "worker flagged");
                }
            }
            if active.iter().all(|index| flagged.contains(index)) {
                return Some(WatchdogReport {
                    detector: detector.name(),
                    workers,
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(index: usize, elapsed: Option<u64>) -> WorkerSnapshot {
        WorkerSnapshot {
            index,
            thread: format!("pipeline-worker-{index}"),
            task: elapsed.map(|_| index as u64),
            description: elapsed.map(|_| format!("task {index}")),
            elapsed: elapsed.map(Duration::from_millis),
            held_locks: Vec::new(),
        }
    }

    #[test]
    fn stuck_detector_flags_only_long_running_workers() {
        let detector = StuckTaskDetector::new(Duration::from_millis(100));
        let workers = [snapshot(0, Some(500)), snapshot(1, Some(10)), snapshot(2, None)];
        assert_eq!(detector.implicated(&workers), vec![0]);
    }

    #[test]
    fn inspect_requires_every_active_worker_implicated() {
        let slots = [WorkerSlot::new("w0"), WorkerSlot::new("w1")];
        let watchdog = Watchdog::new(Duration::from_millis(10))
            .with_detector(Box::new(StuckTaskDetector::new(Duration::ZERO)));
        assert!(watchdog.inspect(&slots).is_none(), "idle pool");

        slots[0].begin(1, "task 1".to_string());
        std::thread::sleep(Duration::from_millis(5));
        let report = watchdog.inspect(&slots).expect("single active worker stuck");
        assert_eq!(report.detector, "stuck-task");
        assert!(report.to_string().contains("w1: idle"));

        slots[0].hold("Serial");
        let dump = watchdog.inspect(&slots).expect("still stuck").to_string();
        assert!(dump.contains("holding [Serial]"));
        slots[0].unhold("Serial");
        slots[0].idle();
        assert!(watchdog.inspect(&slots).is_none());
    }

    #[test]
    fn restarting_the_same_step_keeps_the_clock() {
        let slot = WorkerSlot::new("w0");
        slot.begin(7, "task 7".to_string());
        let first = slot.snapshot(0, Instant::now()).elapsed.expect("active");
        std::thread::sleep(Duration::from_millis(5));
        slot.begin(7, "task 7".to_string());
        let second = slot.snapshot(0, Instant::now()).elapsed.expect("active");
        assert!(second > first);
    }

    #[test]
    fn moving_to_the_next_step_restarts_the_clock() {
        let slot = WorkerSlot::new("w0");
        slot.begin(7, "Inline on c0.m0".to_string());
        std::thread::sleep(Duration::from_millis(20));
        let before = slot.snapshot(0, Instant::now()).elapsed.expect("active");
        slot.begin(7, "Unroll on c0.m0".to_string());
        let after = slot.snapshot(0, Instant::now()).elapsed.expect("active");
        assert!(after < before);
    }

    #[test]
    fn disabled_config_yields_no_watchdog() {
        let cfg = WatchdogConfig {
            enabled: false,
            ..WatchdogConfig::default()
        };
        assert!(Watchdog::from_config(&cfg).is_none());
        assert!(Watchdog::from_config(&WatchdogConfig::default()).is_some());
    }
}
