use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail};
use parking_lot::Mutex;
use pipeline::core::catalog::Catalog;
use pipeline::core::descriptor::UnitDefinition;
use pipeline::core::plan::Plan;
use pipeline::core::request::ScheduleRequest;
use pipeline::engine::{ParallelEngine, ScheduleInstance, create_instance};
use pipeline::error::RunError;
use pipeline::io::config::{EngineConfig, EngineKind, PipelineConfig, WatchdogConfig, WorkerPolicy};
use pipeline::schedule::{Planner, ReplayPlanner};
use pipeline::test_support::{
    CLASS, ChildrenAdapter, FnRunner, METHOD, Recorder, SESSION, TestTree,
};
use pipeline::unit::{DataNode, Filter, NodeRef, RunContext};

const NESTED: &str = "\
Start
SessionToClass
{
  ClassToMethod
  {
    Work
  }
  After
}
Finish
";

fn adapters() -> Vec<UnitDefinition> {
    vec![
        UnitDefinition::adapter("SessionToClass", SESSION, CLASS, ChildrenAdapter),
        UnitDefinition::adapter("ClassToMethod", CLASS, METHOD, ChildrenAdapter),
    ]
}

fn plan(units: Vec<UnitDefinition>, outline: &str) -> Plan {
    let mut defs = adapters();
    defs.extend(units);
    let mut request = ScheduleRequest::new(Arc::new(Catalog::new(defs).expect("catalogue")));
    request.add_all_units();
    ReplayPlanner::from_text(outline)
        .expect("outline")
        .build_plan(&request, SESSION)
        .expect("plan")
}

fn recorded_plan(recorder: &Recorder) -> Plan {
    plan(
        vec![
            UnitDefinition::runner("Start", SESSION, recorder.runner()),
            UnitDefinition::runner("Work", METHOD, recorder.runner()),
            UnitDefinition::runner("After", CLASS, recorder.runner()),
            UnitDefinition::runner("Finish", SESSION, recorder.runner()),
        ],
        NESTED,
    )
}

fn config(kind: EngineKind, workers: usize) -> PipelineConfig {
    PipelineConfig {
        engine: EngineConfig {
            kind,
            workers: WorkerPolicy::Fixed { count: workers },
            ..EngineConfig::default()
        },
        ..PipelineConfig::default()
    }
}

fn tree() -> NodeRef {
    TestTree::session(
        "s",
        vec![
            TestTree::class("c0", 3),
            TestTree::class("empty", 0),
            TestTree::class("c1", 5),
        ],
    )
}

fn position(entries: &[String], entry: &str) -> usize {
    entries
        .iter()
        .position(|e| e == entry)
        .unwrap_or_else(|| panic!("{entry} not recorded in {entries:?}"))
}

#[test]
fn step_after_adapter_waits_for_every_child() {
    let recorder = Recorder::new();
    let instance = create_instance(&recorded_plan(&recorder), &config(EngineKind::MultiWorker, 4));
    instance.process(tree()).expect("run");

    let entries = recorder.entries();
    assert_eq!(entries.len(), 1 + 8 + 3 + 1);
    assert_eq!(entries[0], "Start:s");
    assert_eq!(entries.last().map(String::as_str), Some("Finish:s"));
    for (class, methods) in [("c0", 3), ("c1", 5)] {
        let after = position(&entries, &format!("After:{class}"));
        for m in 0..methods {
            assert!(position(&entries, &format!("Work:{class}.m{m}")) < after);
        }
    }
}

#[test]
fn adapter_without_children_proceeds_immediately() {
    let recorder = Recorder::new();
    let instance = create_instance(&recorded_plan(&recorder), &config(EngineKind::MultiWorker, 2));
    instance
        .process(TestTree::session("s", vec![TestTree::class("empty", 0)]))
        .expect("run");
    assert_eq!(recorder.entries(), ["Start:s", "After:empty", "Finish:s"]);
}

#[test]
fn engines_agree_on_order_within_each_node() {
    let sequential = Recorder::new();
    create_instance(&recorded_plan(&sequential), &config(EngineKind::SingleThreaded, 1))
        .process(tree())
        .expect("sequential run");
    let parallel = Recorder::new();
    create_instance(&recorded_plan(&parallel), &config(EngineKind::MultiWorker, 3))
        .process(tree())
        .expect("parallel run");

    let mut expected = sequential.entries();
    let mut actual = parallel.entries();
    for label in ["s", "c0", "c1", "empty", "c1.m4"] {
        assert_eq!(sequential.for_node(label), parallel.for_node(label), "{label}");
    }
    expected.sort();
    actual.sort();
    assert_eq!(expected, actual);
}

#[test]
fn serialized_step_never_overlaps() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let runs = Arc::new(AtomicUsize::new(0));
    let serial = {
        let (in_flight, peak, runs) = (in_flight.clone(), peak.clone(), runs.clone());
        FnRunner::new(move |_ctx: &RunContext<'_>, _node: &NodeRef| {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(2));
            in_flight.fetch_sub(1, Ordering::SeqCst);
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    };
    let plan = plan(
        vec![UnitDefinition::runner("Serial", METHOD, serial).synchronized()],
        "SessionToClass\n{\n  ClassToMethod\n  {\n    Serial\n  }\n}\n",
    );
    ParallelEngine::new(
        &plan,
        &config(EngineKind::MultiWorker, 4).engine,
        &WatchdogConfig::default(),
    )
    .process(TestTree::uniform(4, 4))
    .expect("run");

    assert_eq!(runs.load(Ordering::SeqCst), 16);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[test]
fn unit_failure_is_wrapped_with_unit_and_node() {
    let failing = || {
        FnRunner::new(|_ctx: &RunContext<'_>, node: &NodeRef| {
            if node.label() == "c1.m2" {
                bail!("cannot inline");
            }
            Ok(())
        })
    };
    for kind in [EngineKind::SingleThreaded, EngineKind::MultiWorker] {
        let plan = plan(
            vec![UnitDefinition::runner("Inline", METHOD, failing())],
            "SessionToClass\n{\n  ClassToMethod\n  {\n    Inline\n  }\n}\n",
        );
        let err = create_instance(&plan, &config(kind, 3))
            .process(tree())
            .expect_err("failure");
        match err {
            RunError::Unit { unit, node, source } => {
                assert_eq!(unit, "Inline");
                assert_eq!(node, "c1.m2");
                assert_eq!(source.to_string(), "cannot inline");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}

#[test]
fn panicking_unit_fails_the_run_without_stranding_workers() {
    let plan = plan(
        vec![UnitDefinition::runner(
            "Boom",
            METHOD,
            FnRunner::new(|_ctx: &RunContext<'_>, _node: &NodeRef| panic!("kaboom")),
        )],
        "SessionToClass\n{\n  ClassToMethod\n  {\n    Boom\n  }\n}\n",
    );
    let err = create_instance(&plan, &config(EngineKind::MultiWorker, 2))
        .process(tree())
        .expect_err("panic");
    assert!(matches!(err, RunError::Unit { ref unit, .. } if unit == "Boom"));
    assert!(format!("{:#}", anyhow::Error::from(err)).contains("kaboom"));
}

#[test]
fn units_see_their_ancestors() {
    let plan = plan(
        vec![UnitDefinition::runner(
            "Check",
            METHOD,
            FnRunner::new(|ctx: &RunContext<'_>, node: &NodeRef| {
                let class = ctx
                    .ancestor(CLASS)
                    .ok_or_else(|| anyhow!("no class above {}", node.label()))?;
                if !node.label().starts_with(&format!("{}.", class.label())) {
                    bail!("{} is not inside {}", node.label(), class.label());
                }
                if ctx.ancestor(SESSION).is_none() {
                    bail!("no session above {}", node.label());
                }
                Ok(())
            }),
        )],
        "SessionToClass\n{\n  ClassToMethod\n  {\n    Check\n  }\n}\n",
    );
    for kind in [EngineKind::SingleThreaded, EngineKind::MultiWorker] {
        create_instance(&plan, &config(kind, 3))
            .process(tree())
            .expect("ancestors visible");
    }
}

#[test]
fn work_runs_on_named_threads() {
    let threads = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&threads);
    let plan = plan(
        vec![UnitDefinition::runner(
            "Where",
            SESSION,
            FnRunner::new(move |_ctx: &RunContext<'_>, _node: &NodeRef| {
                seen.lock()
                    .push(thread::current().name().unwrap_or_default().to_string());
                Ok(())
            }),
        )],
        "Where\n",
    );
    create_instance(&plan, &config(EngineKind::SingleThreaded, 1))
        .process(tree())
        .expect("sequential");
    create_instance(&plan, &config(EngineKind::MultiWorker, 2))
        .process(tree())
        .expect("parallel");

    let threads = threads.lock();
    assert_eq!(threads[0], "pipeline-main");
    assert!(threads[1].starts_with("pipeline-worker-"), "{}", threads[1]);
}

#[test]
fn root_of_the_wrong_type_is_rejected() {
    let recorder = Recorder::new();
    let err = create_instance(&recorded_plan(&recorder), &config(EngineKind::MultiWorker, 2))
        .process(TestTree::class("c", 1))
        .expect_err("class root");
    assert!(matches!(err, RunError::RootMismatch { .. }));
    assert!(recorder.entries().is_empty());
}

#[test]
fn watchdog_aborts_a_wedged_run() {
    let plan = plan(
        vec![UnitDefinition::runner(
            "Sleepy",
            SESSION,
            FnRunner::new(|_ctx: &RunContext<'_>, _node: &NodeRef| {
                thread::sleep(Duration::from_secs(3));
                Ok(())
            }),
        )],
        "Sleepy\n",
    );
    let watchdog = WatchdogConfig {
        enabled: true,
        poll_interval_ms: 20,
        stuck_task_timeout_ms: 100,
    };
    let engine = ParallelEngine::new(&plan, &config(EngineKind::MultiWorker, 1).engine, &watchdog);

    let err = engine.process(tree()).expect_err("watchdog abort");
    let RunError::Watchdog { report } = err else {
        panic!("unexpected error {err:?}");
    };
    assert_eq!(report.detector, "stuck-task");
    assert_eq!(report.workers.len(), 1);
    let worker = &report.workers[0];
    assert_eq!(worker.thread, "pipeline-worker-0");
    assert!(worker.description.as_deref().unwrap_or_default().contains("Sleepy"));
    assert!(worker.elapsed.is_some_and(|elapsed| elapsed >= Duration::from_millis(100)));
}

const WALK_ORDER: [&str; 12] = [
    "s", "c0", "c0.m0", "c0.m1", "c0.m2", "empty", "c1", "c1.m0", "c1.m1", "c1.m2", "c1.m3",
    "c1.m4",
];

#[test]
fn visitor_walks_the_tree_in_pre_order() {
    for kind in [EngineKind::SingleThreaded, EngineKind::MultiWorker] {
        let recorder = Recorder::new();
        let plan = plan(
            vec![UnitDefinition::visitor("Walk", SESSION, recorder.runner())],
            "Walk\n",
        );
        create_instance(&plan, &config(kind, 3))
            .process(tree())
            .expect("run");
        let expected: Vec<String> = WALK_ORDER.iter().map(|label| format!("Walk:{label}")).collect();
        assert_eq!(recorder.entries(), expected, "{kind:?}");
    }
}

#[test]
fn filtered_node_is_skipped_but_its_descendants_are_not() {
    for kind in [EngineKind::SingleThreaded, EngineKind::MultiWorker] {
        let recorder = Recorder::new();
        let plan = plan(
            vec![
                UnitDefinition::visitor("Walk", SESSION, recorder.runner())
                    .filter(Filter::new("not-c1", |node: &dyn DataNode| node.label() != "c1")),
                UnitDefinition::runner("Work", METHOD, recorder.runner()).filter(Filter::new(
                    "not-first",
                    |node: &dyn DataNode| !node.label().ends_with(".m0"),
                )),
            ],
            "Walk\nSessionToClass\n{\n  ClassToMethod\n  {\n    Work\n  }\n}\n",
        );
        create_instance(&plan, &config(kind, 3))
            .process(tree())
            .expect("run");

        let entries = recorder.entries();
        assert!(!entries.contains(&"Walk:c1".to_string()), "{kind:?}");
        for label in ["s", "c0", "c1.m0", "c1.m4"] {
            assert!(entries.contains(&format!("Walk:{label}")), "{kind:?} {label}");
        }
        let work: Vec<&String> = entries.iter().filter(|e| e.starts_with("Work:")).collect();
        assert_eq!(work.len(), 6, "{kind:?}");
        assert!(!work.iter().any(|e| e.ends_with(".m0")), "{kind:?}");
    }
}

#[test]
fn visitor_failure_names_the_failing_descendant() {
    let plan = plan(
        vec![UnitDefinition::visitor(
            "Walk",
            SESSION,
            FnRunner::new(|_ctx: &RunContext<'_>, node: &NodeRef| {
                if node.label() == "c1.m3" {
                    bail!("unreadable body");
                }
                Ok(())
            }),
        )],
        "Walk\n",
    );
    for kind in [EngineKind::SingleThreaded, EngineKind::MultiWorker] {
        let err = create_instance(&plan, &config(kind, 2))
            .process(tree())
            .expect_err("failure");
        match err {
            RunError::Unit { unit, node, source } => {
                assert_eq!(unit, "Walk");
                assert_eq!(node, "c1.m3");
                assert_eq!(source.to_string(), "unreadable body");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}

#[test]
fn unmanaged_locks_let_synchronized_steps_overlap() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let overlapping = {
        let (in_flight, peak) = (in_flight.clone(), peak.clone());
        FnRunner::new(move |_ctx: &RunContext<'_>, _node: &NodeRef| {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            let deadline = std::time::Instant::now() + Duration::from_secs(2);
            while in_flight.load(Ordering::SeqCst) < 2 && std::time::Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
    };
    let plan = plan(
        vec![UnitDefinition::runner("Serial", METHOD, overlapping).synchronized()],
        "SessionToClass\n{\n  ClassToMethod\n  {\n    Serial\n  }\n}\n",
    );
    let mut cfg = config(EngineKind::MultiWorker, 3);
    cfg.engine.engine_managed_locks = false;
    create_instance(&plan, &cfg)
        .process(TestTree::session("s", vec![TestTree::class("c", 2)]))
        .expect("run");
    assert_eq!(peak.load(Ordering::SeqCst), 2);
}
