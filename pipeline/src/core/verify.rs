//! End-to-end soundness check for a finished plan.
//!
//! The plan tree is treated as one logical sequence: a state set, a
//! deliverable set and the active protections are threaded through a
//! pre-order walk, and adapter sub-plans share the same accumulators as the
//! steps around them.

use tracing::instrument;

use crate::core::descriptor::UnitDescriptor;
use crate::core::plan::{Plan, PlanStep};
use crate::core::request::ScheduleRequest;
use crate::core::state::{FeatureSet, ProductionSet, StateSet};
use crate::error::PlanError;

/// Protection declared by an earlier step that is still in force.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Guard {
    protector: String,
    items: StateSet,
    lifted_by: StateSet,
}

/// Why a unit cannot run in a given snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    Missing(StateSet),
    Forbidden(StateSet),
    Protected {
        items: StateSet,
        protector: String,
        /// Items whose addition ends the protection.
        lifted_by: StateSet,
    },
}

impl Violation {
    pub fn into_error(self, step: &str, state: &StateSet) -> PlanError {
        let step = step.to_string();
        let state = state.clone();
        match self {
            Violation::Missing(missing) => PlanError::MissingItems {
                step,
                missing,
                state,
            },
            Violation::Forbidden(conflicting) => PlanError::ForbiddenItems {
                step,
                conflicting,
                state,
            },
            Violation::Protected {
                items, protector, ..
            } => PlanError::Protected {
                step,
                items,
                protector,
                state,
            },
        }
    }
}

/// Accumulated state at one point of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    state: StateSet,
    productions: ProductionSet,
    guards: Vec<Guard>,
}

impl Snapshot {
    pub fn initial(request: &ScheduleRequest) -> Self {
        Self {
            state: request.initial().clone(),
            productions: ProductionSet::new(),
            guards: Vec::new(),
        }
    }

    pub fn state(&self) -> &StateSet {
        &self.state
    }

    pub fn productions(&self) -> &ProductionSet {
        &self.productions
    }

    /// First reason `unit` cannot run here, if any.
    pub fn check(&self, unit: &UnitDescriptor, features: &FeatureSet) -> Option<Violation> {
        let missing = unit.needs_for(features).difference(&self.state);
        if !missing.is_empty() {
            return Some(Violation::Missing(missing));
        }
        let conflicting = unit.forbids_for(features).intersection(&self.state);
        if !conflicting.is_empty() {
            return Some(Violation::Forbidden(conflicting));
        }
        let touched = unit.touched();
        for guard in &self.guards {
            let items = touched.intersection(&guard.items);
            if !items.is_empty() && !unit.adds().intersects(&guard.lifted_by) {
                return Some(Violation::Protected {
                    items,
                    protector: guard.protector.clone(),
                    lifted_by: guard.lifted_by.clone(),
                });
            }
        }
        None
    }

    /// Apply a unit's effects. Adapters declare none and leave the snapshot as is.
    pub fn apply(&mut self, unit: &UnitDescriptor) {
        self.state.extend_from(unit.adds());
        self.state.remove_all(unit.removes());
        self.productions.extend_from(unit.produces());
        let adds = unit.adds();
        self.guards.retain(|guard| !guard.lifted_by.intersects(adds));
        for protection in unit.protections() {
            self.guards.push(Guard {
                protector: unit.name().to_string(),
                items: protection.items().clone(),
                lifted_by: protection.lifting_items().clone(),
            });
        }
    }

    /// Check the request's goal against this snapshot.
    pub fn check_goal(&self, request: &ScheduleRequest) -> Result<(), PlanError> {
        let missing = request.target_include().difference(&self.state);
        if !missing.is_empty() {
            return Err(PlanError::TargetMissing {
                missing,
                state: self.state.clone(),
            });
        }
        let present = request.target_exclude().intersection(&self.state);
        if !present.is_empty() {
            return Err(PlanError::TargetExcluded {
                present,
                state: self.state.clone(),
            });
        }
        if &self.productions != request.productions() {
            return Err(PlanError::ProductionMismatch {
                expected: request.productions().clone(),
                actual: self.productions.clone(),
            });
        }
        Ok(())
    }
}

/// Final state and deliverables of a verified plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified {
    pub state: StateSet,
    pub productions: ProductionSet,
}

impl Plan {
    /// Prove the plan sound for `request`, or name the first failing step.
    #[instrument(skip_all, fields(root = %self.node_type(), steps = self.step_count()))]
    pub fn verify(&self, request: &ScheduleRequest) -> Result<Verified, PlanError> {
        let mut snapshot = Snapshot::initial(request);
        thread(self, request.features(), &mut snapshot)?;
        snapshot.check_goal(request)?;
        tracing::debug!(state = %snapshot.state, productions = %snapshot.productions, "plan verified");
        Ok(Verified {
            state: snapshot.state,
            productions: snapshot.productions,
        })
    }
}

fn thread(plan: &Plan, features: &FeatureSet, snapshot: &mut Snapshot) -> Result<(), PlanError> {
    for step in plan.steps() {
        match step {
            PlanStep::Runner(unit) => {
                if let Some(violation) = snapshot.check(unit, features) {
                    return Err(violation.into_error(unit.name(), &snapshot.state));
                }
                snapshot.apply(unit);
            }
            PlanStep::Adapter { plan, .. } => thread(plan, features, snapshot)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::catalog::Catalog;
    use crate::core::descriptor::{Protection, UnitDefinition};
    use crate::core::plan::PlanBuilder;
    use crate::core::state::Production;
    use crate::test_support::{CLASS, NoopAdapter, NoopRunner, SESSION, X, Y, Z};

    const REPORT: Production = Production::new("report");

    fn request() -> ScheduleRequest {
        let catalog = Catalog::new([
            UnitDefinition::runner("A", SESSION, NoopRunner).adds([X]),
            UnitDefinition::runner("B", CLASS, NoopRunner).needs([X]).adds([Y]),
            UnitDefinition::runner("Clear", SESSION, NoopRunner)
                .needs([Y])
                .removes([X])
                .forbids([Z]),
            UnitDefinition::runner("Report", SESSION, NoopRunner)
                .needs([Y])
                .produces(REPORT),
            UnitDefinition::runner("Keep", SESSION, NoopRunner)
                .adds([Z])
                .protects(Protection::new([X]).lifted_by([Y])),
            UnitDefinition::adapter("SessionToClass", SESSION, CLASS, NoopAdapter),
        ])
        .expect("catalogue");
        let mut request = ScheduleRequest::new(Arc::new(catalog));
        request.add_all_units();
        request
    }

    fn unit(request: &ScheduleRequest, name: &str) -> Arc<UnitDescriptor> {
        Arc::clone(request.catalog().require(name).expect("known unit"))
    }

    #[test]
    fn sub_plan_effects_are_visible_after_adapter() {
        let mut request = request();
        request.add_target_include([Y]).add_production(REPORT);
        let mut builder = PlanBuilder::new(SESSION);
        builder.append(&unit(&request, "A")).expect("A");
        builder
            .append_sub_plan(&unit(&request, "SessionToClass"))
            .expect("adapter")
            .append(&unit(&request, "B"))
            .expect("B");
        builder.append(&unit(&request, "Report")).expect("report");
        let plan = builder.into_unverified();

        let first = plan.verify(&request).expect("valid");
        let second = plan.verify(&request).expect("still valid");
        assert_eq!(first, second);
        assert_eq!(first.state, StateSet::from([X, Y]));
        assert_eq!(first.productions, ProductionSet::from([REPORT]));
    }

    #[test]
    fn missing_need_names_items_and_state() {
        let request = request();
        let mut builder = PlanBuilder::new(SESSION);
        builder.append(&unit(&request, "Report")).expect("report");
        let err = builder.get_plan(&request).expect_err("missing y");
        match err {
            PlanError::MissingItems {
                step,
                missing,
                state,
            } => {
                assert_eq!(step, "Report");
                assert_eq!(missing, StateSet::from([Y]));
                assert!(state.is_empty());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn over_production_is_rejected() {
        let mut request = request();
        request.add_initial([Y]);
        let mut builder = PlanBuilder::new(SESSION);
        builder.append(&unit(&request, "Report")).expect("report");
        let err = builder.get_plan(&request).expect_err("superset");
        assert!(matches!(err, PlanError::ProductionMismatch { .. }));
    }

    #[test]
    fn forbidden_and_target_checks() {
        let mut request = request();
        request.add_initial([X, Y, Z]);
        let mut builder = PlanBuilder::new(SESSION);
        builder.append(&unit(&request, "Clear")).expect("clear");
        let err = builder.get_plan(&request).expect_err("z forbidden");
        assert!(matches!(err, PlanError::ForbiddenItems { .. }));

        let mut request = self::request();
        request.add_target_exclude([X]);
        let mut builder = PlanBuilder::new(SESSION);
        builder.append(&unit(&request, "A")).expect("A");
        let err = builder.get_plan(&request).expect_err("x excluded");
        assert!(matches!(err, PlanError::TargetExcluded { .. }));
    }

    #[test]
    fn protection_blocks_until_lifted() {
        let mut request = request();
        request.add_initial([Y]);
        let mut builder = PlanBuilder::new(SESSION);
        builder.append(&unit(&request, "Keep")).expect("keep");
        builder.append(&unit(&request, "A")).expect("A");
        let err = builder.get_plan(&request).expect_err("x protected");
        match err {
            PlanError::Protected {
                step, protector, ..
            } => {
                assert_eq!(step, "A");
                assert_eq!(protector, "Keep");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
