//! Backtracking search for a valid ordering of candidate runners.
//!
//! Runners that produce a requested deliverable or support an enabled feature
//! are mandatory and must all appear. Every other candidate is optional and
//! is only inserted to fix a precondition, a protection or the goal. One
//! repair never inserts the same optional unit twice; separate repairs may.
//!
//! The search works on a flat runner sequence. Adapters carry no state
//! effects, so the sequence is checked on its own and only nested into a plan
//! tree once it is complete. The state reachable at each position is cached
//! and recomputed only from the last mutated position onwards.

use std::sync::Arc;

use tracing::instrument;

use crate::core::descriptor::UnitDescriptor;
use crate::core::plan::Plan;
use crate::core::request::ScheduleRequest;
use crate::core::state::{NodeType, ProductionSet};
use crate::core::verify::{Snapshot, Violation};
use crate::error::PlanError;
use crate::io::config::SearchConfig;
use crate::schedule::Planner;
use crate::schedule::adapters::{AdapterGraph, Nester};
use crate::schedule::fitness::fitness;

/// First-fit backtracking planner.
#[derive(Debug, Clone)]
pub struct BacktrackPlanner {
    max_adapter_depth: usize,
    max_search_steps: u64,
}

impl BacktrackPlanner {
    pub fn new(cfg: &SearchConfig) -> Self {
        Self {
            max_adapter_depth: cfg.max_adapter_depth,
            max_search_steps: cfg.max_search_steps,
        }
    }
}

impl Default for BacktrackPlanner {
    fn default() -> Self {
        Self::new(&SearchConfig::default())
    }
}

impl Planner for BacktrackPlanner {
    #[instrument(skip_all, fields(root = %root, candidates = request.runners().len()))]
    fn build_plan(&self, request: &ScheduleRequest, root: NodeType) -> Result<Plan, PlanError> {
        let graph = AdapterGraph::new(request.adapters(), self.max_adapter_depth);
        let Partition {
            mut mandatory,
            optional,
        } = partition(request, &graph, root)?;
        tracing::debug!(
            mandatory = mandatory.len(),
            optional = optional.len(),
            "candidates partitioned"
        );

        let mut search = Search::new(request, optional, self.max_search_steps);
        match search.place(&mut mandatory, 0) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(steps = search.steps, "search space exhausted");
                return Err(PlanError::PlanNotFound);
            }
            Err(Exhausted) => {
                tracing::debug!(limit = self.max_search_steps, "search step budget exhausted");
                return Err(PlanError::PlanNotFound);
            }
        }

        let mut nester = Nester::new(graph, root);
        for unit in &search.seq {
            nester.push(unit)?;
        }
        let plan = nester.finish()?;
        plan.verify(request)?;
        tracing::debug!(
            steps = search.steps,
            units = search.seq.len(),
            fitness = fitness(&plan, request),
            "plan found"
        );
        Ok(plan)
    }
}

struct Partition {
    mandatory: Vec<Arc<UnitDescriptor>>,
    optional: Vec<Arc<UnitDescriptor>>,
}

/// Split candidates into mandatory and optional runners.
///
/// Each requested deliverable gets the first candidate in request order that
/// produces it without producing anything unrequested or already covered;
/// other producers are left out. Unreachable optional runners are dropped;
/// an unreachable mandatory runner means there is no plan.
fn partition(
    request: &ScheduleRequest,
    graph: &AdapterGraph<'_>,
    root: NodeType,
) -> Result<Partition, PlanError> {
    let requested = request.productions();
    let candidates: Vec<&Arc<UnitDescriptor>> = request.candidate_runners().collect();
    let mut mandatory: Vec<Arc<UnitDescriptor>> = Vec::new();
    let mut covered = ProductionSet::new();

    for production in requested {
        if covered.contains(production) {
            continue;
        }
        let producer = candidates.iter().find(|unit| {
            unit.produces().contains(production)
                && unit.produces().is_subset(requested)
                && !unit.produces().intersects(&covered)
        });
        let Some(producer) = producer else {
            tracing::debug!(%production, "no candidate produces deliverable");
            return Err(PlanError::PlanNotFound);
        };
        if !graph.reachable(root, producer) {
            tracing::debug!(unit = producer.name(), "producer unreachable from root");
            return Err(PlanError::PlanNotFound);
        }
        covered.extend_from(producer.produces());
        mandatory.push(Arc::clone(producer));
    }

    for unit in &candidates {
        if unit.supports().is_empty() || mandatory.iter().any(|m| m.name() == unit.name()) {
            continue;
        }
        if !unit.produces().is_empty() {
            if !unit.produces().is_subset(requested) || unit.produces().intersects(&covered) {
                tracing::debug!(unit = unit.name(), "feature supporter would over-produce");
                continue;
            }
            covered.extend_from(unit.produces());
        }
        if !graph.reachable(root, unit) {
            tracing::debug!(unit = unit.name(), "feature supporter unreachable from root");
            return Err(PlanError::PlanNotFound);
        }
        mandatory.push(Arc::clone(unit));
    }

    let optional = candidates
        .into_iter()
        .filter(|unit| {
            unit.produces().is_empty() && unit.supports().is_empty() && graph.reachable(root, unit)
        })
        .cloned()
        .collect();

    Ok(Partition {
        mandatory,
        optional,
    })
}

/// The step budget ran out.
struct Exhausted;

struct Search<'r> {
    request: &'r ScheduleRequest,
    optional: Vec<Arc<UnitDescriptor>>,
    seq: Vec<Arc<UnitDescriptor>>,
    /// `snapshots[i]` is the state before `seq[i]`; only a prefix is valid.
    snapshots: Vec<Snapshot>,
    /// Positions of insertions, undone in reverse.
    journal: Vec<usize>,
    /// Optional units inserted by the repair in progress, innermost last.
    chain: Vec<Arc<UnitDescriptor>>,
    steps: u64,
    max_steps: u64,
}

impl<'r> Search<'r> {
    fn new(request: &'r ScheduleRequest, optional: Vec<Arc<UnitDescriptor>>, max_steps: u64) -> Self {
        Self {
            request,
            optional,
            seq: Vec::new(),
            snapshots: vec![Snapshot::initial(request)],
            journal: Vec::new(),
            chain: Vec::new(),
            steps: 0,
            max_steps,
        }
    }

    fn tick(&mut self) -> Result<(), Exhausted> {
        self.steps += 1;
        if self.steps > self.max_steps {
            return Err(Exhausted);
        }
        Ok(())
    }

    /// Place every remaining mandatory unit after `cursor`, then close the goal.
    fn place(
        &mut self,
        remaining: &mut Vec<Arc<UnitDescriptor>>,
        cursor: usize,
    ) -> Result<bool, Exhausted> {
        if remaining.is_empty() {
            return self.close_goal(0);
        }
        for pick in 0..remaining.len() {
            let unit = remaining.remove(pick);
            for pos in cursor..=self.seq.len() {
                self.tick()?;
                let mark = self.journal.len();
                if let Some(at) = self.try_insert(&unit, pos)? {
                    tracing::trace!(unit = unit.name(), at, "placed");
                    if self.place(remaining, at + 1)? {
                        return Ok(true);
                    }
                }
                self.rollback(mark);
            }
            remaining.insert(pick, unit);
        }
        Ok(false)
    }

    /// Insert `unit` at `pos`, fix its preconditions, then re-check the tail.
    /// Returns the unit's final index. The caller rolls back on failure.
    fn try_insert(
        &mut self,
        unit: &Arc<UnitDescriptor>,
        pos: usize,
    ) -> Result<Option<usize>, Exhausted> {
        self.insert(pos, Arc::clone(unit));
        let Some(at) = self.settle(pos, 0)? else {
            return Ok(None);
        };
        if !self.repair_tail(at + 1)? {
            return Ok(None);
        }
        Ok(Some(at))
    }

    fn repair_tail(&mut self, from: usize) -> Result<bool, Exhausted> {
        let mut idx = from;
        while idx < self.seq.len() {
            match self.settle(idx, 0)? {
                Some(at) => idx = at + 1,
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Make `seq[idx]` runnable by inserting optional units right before it.
    /// Returns its index afterwards.
    fn settle(&mut self, idx: usize, depth: usize) -> Result<Option<usize>, Exhausted> {
        self.tick()?;
        let Some(violation) = self.violation_at(idx) else {
            return Ok(Some(idx));
        };
        if depth > self.optional.len() {
            return Ok(None);
        }
        for fix in self.fixes_for(&violation) {
            let mark = self.journal.len();
            let before = self.seq.len();
            self.insert(idx, Arc::clone(&fix));
            self.chain.push(fix);
            let settled = match self.settle(idx, depth + 1) {
                Ok(Some(_)) => {
                    let shifted = idx + (self.seq.len() - before);
                    self.settle(shifted, depth)
                }
                other => other,
            };
            self.chain.pop();
            if let Some(done) = settled? {
                return Ok(Some(done));
            }
            self.rollback(mark);
        }
        Ok(None)
    }

    /// Append optional units until the final state meets the target.
    fn close_goal(&mut self, depth: usize) -> Result<bool, Exhausted> {
        self.tick()?;
        let request = self.request;
        let end = self.seq.len();
        let violation = match self.snapshot_at(end).check_goal(request) {
            Ok(()) => return Ok(true),
            Err(PlanError::TargetMissing { missing, .. }) => Violation::Missing(missing),
            Err(PlanError::TargetExcluded { present, .. }) => Violation::Forbidden(present),
            Err(_) => return Ok(false),
        };
        if depth > self.optional.len() {
            return Ok(false);
        }
        for fix in self.fixes_for(&violation) {
            let mark = self.journal.len();
            self.insert(end, Arc::clone(&fix));
            self.chain.push(fix);
            let closed = match self.settle(end, 0) {
                Ok(Some(_)) => self.close_goal(depth + 1),
                Ok(None) => Ok(false),
                Err(exhausted) => Err(exhausted),
            };
            self.chain.pop();
            if closed? {
                return Ok(true);
            }
            self.rollback(mark);
        }
        Ok(false)
    }

    /// Optional units that would remove the violation's cause, skipping those
    /// already inserted by the repair in progress.
    fn fixes_for(&self, violation: &Violation) -> Vec<Arc<UnitDescriptor>> {
        self.optional
            .iter()
            .filter(|unit| match violation {
                Violation::Missing(items) => unit.adds().intersects(items),
                Violation::Forbidden(items) => unit.removes().intersects(items),
                Violation::Protected { lifted_by, .. } => unit.adds().intersects(lifted_by),
            })
            .filter(|unit| !self.chain.iter().any(|open| open.name() == unit.name()))
            .cloned()
            .collect()
    }

    fn violation_at(&mut self, idx: usize) -> Option<Violation> {
        let request = self.request;
        let unit = Arc::clone(&self.seq[idx]);
        self.snapshot_at(idx).check(&unit, request.features())
    }

    fn snapshot_at(&mut self, idx: usize) -> &Snapshot {
        while self.snapshots.len() <= idx {
            let last = self.snapshots.len() - 1;
            let mut next = self.snapshots[last].clone();
            next.apply(&self.seq[last]);
            self.snapshots.push(next);
        }
        &self.snapshots[idx]
    }

    fn insert(&mut self, idx: usize, unit: Arc<UnitDescriptor>) {
        self.seq.insert(idx, unit);
        self.snapshots.truncate(idx + 1);
        self.journal.push(idx);
    }

    fn rollback(&mut self, mark: usize) {
        while self.journal.len() > mark {
            let Some(idx) = self.journal.pop() else {
                break;
            };
            self.seq.remove(idx);
            self.snapshots.truncate(idx + 1);
        }
    }
}
