//! Plan-quality metric used for instrumentation.

use crate::core::plan::Plan;
use crate::core::request::ScheduleRequest;
use crate::core::state::{ProductionSet, StateSet};

/// Satisfied constraints over satisfied + unsatisfied + superfluous deliverables.
///
/// Every needed and forbidden item of every runner counts as one constraint,
/// checked against the state threaded up to that runner, as does every target
/// item and every requested deliverable. The score is 1.0 for an empty
/// request and never exceeds it.
pub fn fitness(plan: &Plan, request: &ScheduleRequest) -> f64 {
    let features = request.features();
    let mut state: StateSet = request.initial().clone();
    let mut produced = ProductionSet::new();
    let mut satisfied = 0usize;
    let mut unsatisfied = 0usize;

    for unit in plan.runners() {
        for item in &unit.needs_for(features) {
            if state.contains(item) {
                satisfied += 1;
            } else {
                unsatisfied += 1;
            }
        }
        for item in &unit.forbids_for(features) {
            if state.contains(item) {
                unsatisfied += 1;
            } else {
                satisfied += 1;
            }
        }
        state.extend_from(unit.adds());
        state.remove_all(unit.removes());
        produced.extend_from(unit.produces());
    }

    for item in request.target_include() {
        if state.contains(item) {
            satisfied += 1;
        } else {
            unsatisfied += 1;
        }
    }
    for item in request.target_exclude() {
        if state.contains(item) {
            unsatisfied += 1;
        } else {
            satisfied += 1;
        }
    }
    for production in request.productions() {
        if produced.contains(production) {
            satisfied += 1;
        } else {
            unsatisfied += 1;
        }
    }
    let superfluous = produced.difference(request.productions()).len();

    let total = satisfied + unsatisfied + superfluous;
    if total == 0 {
        return 1.0;
    }
    (satisfied as f64 / total as f64).min(1.0)
}
