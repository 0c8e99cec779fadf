//! Pipeline configuration stored as TOML.

use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Pipeline configuration (TOML).
///
/// Missing fields default to values suitable for a single compile run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Strategy used to obtain a plan.
    pub planner: PlannerKind,

    /// Replay file read when `planner = "replay"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay_path: Option<PathBuf>,

    pub search: SearchConfig,

    pub engine: EngineConfig,

    pub watchdog: WatchdogConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PlannerKind {
    /// Plans are assembled by hand; automatic planning always fails.
    Manual,
    /// Plans are read back from a recorded replay file.
    Replay,
    /// Plans are found by backtracking search.
    #[default]
    Backtrack,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SearchConfig {
    /// Longest adapter chain considered when changing node type.
    pub max_adapter_depth: usize,

    /// Upper bound on insertion attempts before the search gives up.
    pub max_search_steps: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_adapter_depth: 4,
            max_search_steps: 100_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    #[default]
    SingleThreaded,
    MultiWorker,
}

/// Worker pool sizing for the multi-worker engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "policy", rename_all = "lowercase")]
pub enum WorkerPolicy {
    /// One worker per available core.
    #[default]
    Cores,
    /// A fixed number of workers.
    Fixed { count: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    pub kind: EngineKind,

    /// Stack size of the single-threaded engine's thread and of every pool worker.
    pub stack_size_bytes: usize,

    /// Guard synchronized units with the engine's per-step lock.
    pub engine_managed_locks: bool,

    pub workers: WorkerPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::default(),
            stack_size_bytes: 16 * 1024 * 1024,
            engine_managed_locks: true,
            workers: WorkerPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Number of pool workers the policy resolves to on this machine.
    pub fn worker_count(&self) -> usize {
        match self.workers {
            WorkerPolicy::Cores => std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            WorkerPolicy::Fixed { count } => count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WatchdogConfig {
    pub enabled: bool,

    /// Interval between supervisor polls.
    pub poll_interval_ms: u64,

    /// How long a worker may run one task before it is flagged as stuck.
    pub stuck_task_timeout_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 1_000,
            stuck_task_timeout_ms: 10 * 60 * 1_000,
        }
    }
}

impl WatchdogConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stuck_task_timeout(&self) -> Duration {
        Duration::from_millis(self.stuck_task_timeout_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            planner: PlannerKind::default(),
            replay_path: None,
            search: SearchConfig::default(),
            engine: EngineConfig::default(),
            watchdog: WatchdogConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.planner == PlannerKind::Replay && self.replay_path.is_none() {
            return Err(anyhow!("replay_path is required when planner = \"replay\""));
        }
        if self.search.max_adapter_depth == 0 {
            return Err(anyhow!("search.max_adapter_depth must be > 0"));
        }
        if self.search.max_search_steps == 0 {
            return Err(anyhow!("search.max_search_steps must be > 0"));
        }
        if self.engine.stack_size_bytes == 0 {
            return Err(anyhow!("engine.stack_size_bytes must be > 0"));
        }
        if self.engine.workers == (WorkerPolicy::Fixed { count: 0 }) {
            return Err(anyhow!("engine.workers.count must be > 0"));
        }
        if self.watchdog.poll_interval_ms == 0 {
            return Err(anyhow!("watchdog.poll_interval_ms must be > 0"));
        }
        if self.watchdog.stuck_task_timeout_ms == 0 {
            return Err(anyhow!("watchdog.stuck_task_timeout_ms must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PipelineConfig::default()`.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        let cfg = PipelineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PipelineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PipelineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_dir;

    #[test]
    fn load_missing_returns_default() {
        let temp = temp_dir();
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, PipelineConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = temp_dir();
        let path = temp.path().join("nested").join("pipeline.toml");
        let mut cfg = PipelineConfig::default();
        cfg.planner = PlannerKind::Replay;
        cfg.replay_path = Some(PathBuf::from("plan.txt"));
        cfg.engine.kind = EngineKind::MultiWorker;
        cfg.engine.workers = WorkerPolicy::Fixed { count: 3 };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = temp_dir();
        let path = temp.path().join("pipeline.toml");
        fs::write(
            &path,
            "planner = \"manual\"\n[engine]\nkind = \"multi-worker\"\nworkers = { policy = \"fixed\", count = 2 }\n[watchdog]\npoll_interval_ms = 50\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.planner, PlannerKind::Manual);
        assert_eq!(cfg.engine.kind, EngineKind::MultiWorker);
        assert_eq!(cfg.engine.worker_count(), 2);
        assert_eq!(cfg.watchdog.poll_interval(), Duration::from_millis(50));
        assert_eq!(cfg.search, SearchConfig::default());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = PipelineConfig::default();
        cfg.planner = PlannerKind::Replay;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.engine.workers = WorkerPolicy::Fixed { count: 0 };
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.watchdog.poll_interval_ms = 0;
        let err = cfg.validate().expect_err("zero interval");
        assert!(err.to_string().contains("poll_interval_ms"));
    }

    #[test]
    fn cores_policy_resolves_to_at_least_one() {
        assert!(EngineConfig::default().worker_count() >= 1);
    }
}
