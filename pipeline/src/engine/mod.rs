//! Interpreters that run a verified plan over a tree of data nodes.
//!
//! Both engines walk the same compiled form of the plan. The single-threaded
//! engine processes one node at a time depth-first; the multi-worker engine
//! turns every node into a task pulled from a shared queue.

pub mod lock;
pub mod parallel;
pub mod sequential;
pub mod task;
pub mod watchdog;

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use anyhow::anyhow;

use crate::core::descriptor::{UnitBody, UnitDescriptor};
use crate::core::plan::{Plan, PlanStep};
use crate::core::state::NodeType;
use crate::error::RunError;
use crate::io::config::{EngineKind, PipelineConfig};
use crate::unit::{Lineage, NodeIter, NodeRef, RunContext, Visitor};

pub use parallel::ParallelEngine;
pub use sequential::SequentialEngine;

/// A plan ready to run against root nodes.
pub trait ScheduleInstance: Send + Sync {
    /// Run the whole plan on `root`; any unit failure aborts the run.
    fn process(&self, root: NodeRef) -> Result<(), RunError>;
}

/// Build the engine selected by the configuration.
pub fn create_instance(plan: &Plan, cfg: &PipelineConfig) -> Box<dyn ScheduleInstance> {
    match cfg.engine.kind {
        EngineKind::SingleThreaded => Box::new(SequentialEngine::new(plan, &cfg.engine)),
        EngineKind::MultiWorker => Box::new(ParallelEngine::new(plan, &cfg.engine, &cfg.watchdog)),
    }
}

/// One nesting level of a plan, flattened for execution.
#[derive(Debug)]
pub(crate) struct Level {
    pub(crate) node_type: NodeType,
    pub(crate) steps: Vec<Step>,
}

#[derive(Debug)]
pub(crate) struct Step {
    pub(crate) unit: Arc<UnitDescriptor>,
    /// Index of the step's lock among the run's step locks.
    pub(crate) lock: Option<usize>,
    /// Compiled sub-plan of an adapter step.
    pub(crate) nested: Option<Arc<Level>>,
}

impl Level {
    /// Compile a plan; returns the root level and the number of step locks.
    pub(crate) fn compile(plan: &Plan, managed_locks: bool) -> (Arc<Level>, usize) {
        let mut locks = 0;
        let root = Self::compile_level(plan, managed_locks, &mut locks);
        (root, locks)
    }

    fn compile_level(plan: &Plan, managed_locks: bool, locks: &mut usize) -> Arc<Level> {
        let steps = plan
            .steps()
            .iter()
            .map(|step| {
                let unit = Arc::clone(step.unit());
                let lock = (managed_locks && unit.is_synchronized()).then(|| {
                    *locks += 1;
                    *locks - 1
                });
                let nested = match step {
                    PlanStep::Runner(_) => None,
                    PlanStep::Adapter { plan, .. } => {
                        Some(Self::compile_level(plan, managed_locks, locks))
                    }
                };
                Step { unit, lock, nested }
            })
            .collect();
        Arc::new(Level {
            node_type: plan.node_type(),
            steps,
        })
    }
}

pub(crate) fn check_root(level: &Level, root: &NodeRef) -> Result<(), RunError> {
    if root.node_type() != level.node_type {
        return Err(RunError::RootMismatch {
            expected: level.node_type,
            found: root.node_type(),
        });
    }
    Ok(())
}

/// Run a runner or visitor step on one node. Adapter steps are a no-op here.
pub(crate) fn run_unit(
    unit: &UnitDescriptor,
    node: &NodeRef,
    lineage: Option<&Arc<Lineage>>,
) -> Result<(), RunError> {
    match unit.body() {
        UnitBody::Runner(runner) => {
            if !unit.accepts(&**node) {
                tracing::trace!(unit = unit.name(), node = %node.label(), "filtered out");
                return Ok(());
            }
            let ctx = RunContext::new(unit.name(), lineage.map(Arc::as_ref));
            guarded(unit, node, || runner.run(&ctx, node))
        }
        UnitBody::Visitor(visitor) => visit_tree(unit, visitor.as_ref(), node, lineage),
        UnitBody::Adapter { .. } => Ok(()),
    }
}

/// Apply a visitor to `node` and every descendant, pre-order.
fn visit_tree(
    unit: &UnitDescriptor,
    visitor: &dyn Visitor,
    node: &NodeRef,
    lineage: Option<&Arc<Lineage>>,
) -> Result<(), RunError> {
    let mut pending = vec![(Arc::clone(node), lineage.cloned())];
    while let Some((current, above)) = pending.pop() {
        if unit.accepts(&*current) {
            let ctx = RunContext::new(unit.name(), above.as_deref());
            guarded(unit, &current, || visitor.visit(&ctx, &current))?;
        }
        let children = guarded(unit, &current, || Ok(current.children()))?;
        if children.is_empty() {
            continue;
        }
        let link = Arc::new(Lineage::new(Arc::clone(&current), above));
        for child in children.into_iter().rev() {
            pending.push((child, Some(Arc::clone(&link))));
        }
    }
    Ok(())
}

/// Start an adapter step on `node`.
pub(crate) fn open_adapter<'a>(
    unit: &'a UnitDescriptor,
    node: &'a NodeRef,
    lineage: Option<&Arc<Lineage>>,
) -> Result<NodeIter<'a>, RunError> {
    let UnitBody::Adapter { adapter, .. } = unit.body() else {
        return Err(RunError::unit(
            unit.name(),
            node.label(),
            anyhow!("unit is not an adapter"),
        ));
    };
    let ctx = RunContext::new(unit.name(), lineage.map(Arc::as_ref));
    guarded(unit, node, || adapter.adapt(&ctx, node))
}

/// Pull the next produced node, checking it has the nested plan's type.
pub(crate) fn next_child(
    unit: &UnitDescriptor,
    node: &NodeRef,
    children: &mut NodeIter<'_>,
    expected: NodeType,
) -> Result<Option<NodeRef>, RunError> {
    let child = guarded(unit, node, || Ok(children.next()))?;
    match child {
        Some(child) if child.node_type() != expected => Err(RunError::unit(
            unit.name(),
            node.label(),
            anyhow!(
                "adapter produced {} of type {}, expected {}",
                child.label(),
                child.node_type(),
                expected
            ),
        )),
        other => Ok(other),
    }
}

/// Call a unit entry point, wrapping errors and panics with unit and node identity.
fn guarded<T>(
    unit: &UnitDescriptor,
    node: &NodeRef,
    call: impl FnOnce() -> anyhow::Result<T>,
) -> Result<T, RunError> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(cause)) => Err(RunError::unit(unit.name(), node.label(), cause)),
        Err(payload) => Err(RunError::unit(
            unit.name(),
            node.label(),
            anyhow!("panicked: {}", panic_message(payload.as_ref())),
        )),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::Catalog;
    use crate::core::descriptor::UnitDefinition;
    use crate::core::plan::PlanBuilder;
    use crate::test_support::{
        CLASS, METHOD, NoopAdapter, NoopRunner, SESSION, TestNode, TestTree,
    };

    #[test]
    fn compile_assigns_locks_only_to_synchronized_steps() {
        let catalog = Catalog::new([
            UnitDefinition::runner("A", SESSION, NoopRunner).synchronized(),
            UnitDefinition::adapter("SessionToClass", SESSION, CLASS, NoopAdapter),
            UnitDefinition::runner("B", CLASS, NoopRunner),
            UnitDefinition::runner("C", CLASS, NoopRunner).synchronized(),
        ])
        .expect("catalogue");
        let unit = |name: &str| Arc::clone(catalog.require(name).expect("known"));
        let mut builder = PlanBuilder::new(SESSION);
        builder.append(&unit("A")).expect("A");
        builder
            .append_sub_plan(&unit("SessionToClass"))
            .expect("adapter")
            .append(&unit("B"))
            .expect("B")
            .append(&unit("C"))
            .expect("C");
        let plan = builder.into_unverified();

        let (root, locks) = Level::compile(&plan, true);
        assert_eq!(locks, 2);
        assert_eq!(root.steps[0].lock, Some(0));
        let nested = root.steps[1].nested.as_ref().expect("nested");
        assert_eq!(nested.steps[0].lock, None);
        assert_eq!(nested.steps[1].lock, Some(1));

        let (_, unmanaged) = Level::compile(&plan, false);
        assert_eq!(unmanaged, 0);
    }

    #[test]
    fn panics_are_wrapped_with_identity() {
        let catalog = Catalog::new([UnitDefinition::runner(
            "Boom",
            METHOD,
            crate::test_support::FnRunner::new(|_, _| panic!("kaboom")),
        )])
        .expect("catalogue");
        let node = TestNode::new(METHOD, "m1");
        let err = run_unit(catalog.require("Boom").expect("known"), &node, None)
            .expect_err("panic");
        match err {
            RunError::Unit { unit, node, source } => {
                assert_eq!(unit, "Boom");
                assert_eq!(node, "m1");
                assert!(source.to_string().contains("kaboom"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn root_type_is_checked() {
        let (root, _) = Level::compile(&Plan::new(SESSION), true);
        let err = check_root(&root, &TestTree::class("c", 0)).expect_err("mismatch");
        assert!(matches!(err, RunError::RootMismatch { .. }));
    }
}
