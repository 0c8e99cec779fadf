//! Planner for callers that assemble plans by hand.

use crate::core::plan::Plan;
use crate::core::request::ScheduleRequest;
use crate::core::state::NodeType;
use crate::error::PlanError;
use crate::schedule::Planner;

/// Never finds a plan; use [`crate::core::plan::PlanBuilder`] instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualPlanner;

impl Planner for ManualPlanner {
    fn build_plan(&self, _request: &ScheduleRequest, root: NodeType) -> Result<Plan, PlanError> {
        tracing::debug!(%root, "manual planner cannot build plans");
        Err(PlanError::PlanNotFound)
    }
}
