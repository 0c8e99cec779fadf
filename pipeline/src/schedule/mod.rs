//! Strategies that turn a schedule request into a verified plan.

pub mod adapters;
pub mod backtrack;
pub mod fitness;
pub mod manual;
pub mod replay;

use anyhow::{Context, Result};

use crate::core::plan::Plan;
use crate::core::request::ScheduleRequest;
use crate::core::state::NodeType;
use crate::error::PlanError;
use crate::io::config::{PipelineConfig, PlannerKind};
use crate::io::replay_file::load_replay;

pub use backtrack::BacktrackPlanner;
pub use manual::ManualPlanner;
pub use replay::ReplayPlanner;

/// Builds a plan rooted at `root` that satisfies `request`.
pub trait Planner: Send + Sync {
    fn build_plan(&self, request: &ScheduleRequest, root: NodeType) -> Result<Plan, PlanError>;
}

/// Instantiate the planner selected by the configuration.
pub fn planner_from_config(cfg: &PipelineConfig) -> Result<Box<dyn Planner>> {
    let planner: Box<dyn Planner> = match cfg.planner {
        PlannerKind::Manual => Box::new(ManualPlanner),
        PlannerKind::Replay => {
            let path = cfg
                .replay_path
                .as_deref()
                .context("replay planner selected without replay_path")?;
            Box::new(ReplayPlanner::new(load_replay(path)?))
        }
        PlannerKind::Backtrack => Box::new(BacktrackPlanner::new(&cfg.search)),
    };
    Ok(planner)
}
