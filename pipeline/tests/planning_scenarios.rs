use std::sync::Arc;

use pipeline::core::catalog::Catalog;
use pipeline::core::descriptor::{HelperDefinition, UnitDefinition};
use pipeline::core::plan::{Plan, PlanBuilder};
use pipeline::core::request::ScheduleRequest;
use pipeline::core::state::Production;
use pipeline::error::{DescriptorError, PlanError};
use pipeline::io::config::{PipelineConfig, PlannerKind};
use pipeline::io::replay_file::write_replay;
use pipeline::schedule::fitness::fitness;
use pipeline::schedule::{BacktrackPlanner, ManualPlanner, Planner, ReplayPlanner, planner_from_config};
use pipeline::test_support::{CLASS, METHOD, NoopAdapter, NoopRunner, SESSION, X, Y, temp_dir};

const REPORT: Production = Production::new("report");

fn names(plan: &Plan) -> Vec<String> {
    plan.walk()
        .into_iter()
        .map(|step| step.name().to_string())
        .collect()
}

fn two_step_catalog(b_produces: bool) -> Arc<Catalog> {
    let mut b = UnitDefinition::runner("B", SESSION, NoopRunner)
        .needs([X])
        .adds([Y]);
    if b_produces {
        b = b.produces(REPORT);
    }
    Arc::new(
        Catalog::new([
            UnitDefinition::runner("A", SESSION, NoopRunner).adds([X]),
            b,
        ])
        .expect("catalogue"),
    )
}

#[test]
fn target_item_orders_producer_before_consumer() {
    let mut request = ScheduleRequest::new(two_step_catalog(false));
    request.add_all_units().add_target_include([Y]);

    let plan = BacktrackPlanner::default()
        .build_plan(&request, SESSION)
        .expect("plan");
    assert_eq!(names(&plan), ["A", "B"]);
    let verified = plan.verify(&request).expect("verifies");
    assert!(verified.state.contains(&X));
    assert!(verified.state.contains(&Y));
    assert_eq!(fitness(&plan, &request), 1.0);
}

#[test]
fn mandatory_deliverable_producer_pulls_in_its_prerequisite() {
    let mut request = ScheduleRequest::new(two_step_catalog(true));
    request
        .add_all_units()
        .add_target_include([X])
        .add_production(REPORT);

    let plan = BacktrackPlanner::default()
        .build_plan(&request, SESSION)
        .expect("plan");
    assert_eq!(names(&plan), ["A", "B"]);
    assert!(verified_productions(&plan, &request).contains(&REPORT));
}

fn verified_productions(
    plan: &Plan,
    request: &ScheduleRequest,
) -> pipeline::core::state::ProductionSet {
    plan.verify(request).expect("verifies").productions
}

#[test]
fn contradictory_unit_is_rejected_when_the_catalogue_is_built() {
    let err = Catalog::new([
        UnitDefinition::runner("A", SESSION, NoopRunner).adds([X]),
        UnitDefinition::runner("C", SESSION, NoopRunner)
            .needs([X])
            .forbids([X]),
    ])
    .expect_err("malformed");
    match err {
        DescriptorError::Conformance { unit, violations } => {
            assert_eq!(unit, "C");
            assert!(violations[0].contains("needs and forbids"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn helper_constraints_are_checked_after_flattening() {
    let shared = HelperDefinition::new("Loader").adds([X]);
    let err = Catalog::new([UnitDefinition::runner("Twisted", SESSION, NoopRunner)
        .uses(shared)
        .removes([X])])
    .expect_err("adds and removes x");
    assert!(err.to_string().contains("Twisted"));
}

#[test]
fn manual_plan_reports_the_failing_step_and_state() {
    let catalog = two_step_catalog(false);
    let mut request = ScheduleRequest::new(Arc::clone(&catalog));
    request.add_all_units();

    let mut builder = PlanBuilder::new(SESSION);
    builder
        .append(catalog.require("B").expect("known"))
        .expect("append");
    let err = builder.get_plan(&request).expect_err("x missing");
    match err {
        PlanError::MissingItems { step, missing, state } => {
            assert_eq!(step, "B");
            assert!(missing.contains(&X));
            assert!(state.is_empty());
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(matches!(
        ManualPlanner.build_plan(&request, SESSION),
        Err(PlanError::PlanNotFound)
    ));
}

#[test]
fn recorded_plan_replays_through_the_configured_planner() {
    let catalog = Arc::new(
        Catalog::new([
            UnitDefinition::adapter("SessionToClass", SESSION, CLASS, NoopAdapter),
            UnitDefinition::adapter("ClassToMethod", CLASS, METHOD, NoopAdapter),
            UnitDefinition::runner("Load", SESSION, NoopRunner).adds([X]),
            UnitDefinition::runner("Inline", METHOD, NoopRunner)
                .needs([X])
                .produces(REPORT),
        ])
        .expect("catalogue"),
    );
    let mut request = ScheduleRequest::new(catalog);
    request.add_all_units().add_production(REPORT);
    let searched = BacktrackPlanner::default()
        .build_plan(&request, SESSION)
        .expect("plan");

    let dir = temp_dir();
    let path = dir.path().join("plans").join("inline.replay");
    write_replay(&path, &searched).expect("write replay");

    let cfg = PipelineConfig {
        planner: PlannerKind::Replay,
        replay_path: Some(path),
        ..PipelineConfig::default()
    };
    let planner = planner_from_config(&cfg).expect("planner");
    let replayed = planner.build_plan(&request, SESSION).expect("replayed");
    assert_eq!(replayed, searched);
    assert_eq!(
        replayed.describe(false),
        "Load\nSessionToClass\n  ClassToMethod\n    Inline\n"
    );
}

#[test]
fn replay_naming_an_unknown_unit_fails_with_its_line() {
    let mut request = ScheduleRequest::new(two_step_catalog(false));
    request.add_all_units();
    let planner = ReplayPlanner::from_text("A\nMissing\n").expect("well formed");
    match planner.build_plan(&request, SESSION) {
        Err(PlanError::Replay { line, .. }) => assert_eq!(line, 2),
        other => panic!("unexpected result {other:?}"),
    }
}
